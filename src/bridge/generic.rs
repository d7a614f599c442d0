//! `class` annotations required by Dubbo generic invocation.
//!
//! A path such as `items.*.owner` walks untyped maps by key, fans out over every
//! element with `*`, and tags the map it ends on with `"class": <type>`. Paths that
//! do not match the value shape are skipped silently.

use crate::hessian::{NodeId, Value, ValueTree};

const ANY: &str = "*";
const CLASS_KEY: &str = "class";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericType {
    pub path: String,
    /// `path` split on `.` with empty segments dropped.
    pub segments: Vec<String>,
    pub target_type: String,
}

impl GenericType {
    pub fn new(path: impl Into<String>, target_type: impl Into<String>) -> Self {
        let path = path.into();
        let segments = path
            .split('.')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            path,
            segments,
            target_type: target_type.into(),
        }
    }
}

/// Apply every annotation to the root of `tree`.
pub fn annotate(generics: &[GenericType], tree: &mut ValueTree) {
    for generic in generics {
        let root = tree.root();
        annotate_at(tree, root, &generic.segments, &generic.target_type);
    }
}

fn annotate_at(tree: &mut ValueTree, id: NodeId, path: &[String], target_type: &str) {
    let Some((segment, rest)) = path.split_first() else {
        if matches!(tree.get(id), Value::Map { type_name: None, .. }) {
            set_class(tree, id, target_type);
        }
        return;
    };

    if segment == ANY {
        let children: Vec<NodeId> = match tree.get(id) {
            Value::List {
                type_name: None,
                items,
            } => items.clone(),
            Value::Map {
                type_name: None,
                entries,
            } => entries.iter().map(|(_, value)| *value).collect(),
            _ => return,
        };
        for child in children {
            annotate_at(tree, child, rest, target_type);
        }
        return;
    }

    if !matches!(tree.get(id), Value::Map { type_name: None, .. }) {
        return;
    }
    if let Some(child) = tree.map_get(id, segment) {
        annotate_at(tree, child, rest, target_type);
    }
}

fn set_class(tree: &mut ValueTree, map: NodeId, target_type: &str) {
    if let Some(existing) = tree.map_get(map, CLASS_KEY) {
        tree.replace(existing, Value::String(target_type.to_string()));
        return;
    }
    let key = tree.push(Value::String(CLASS_KEY.to_string()));
    let value = tree.push(Value::String(target_type.to_string()));
    if let Some(Value::Map { entries, .. }) = tree.get_mut(map) {
        entries.push((key, value));
    }
}
