//! Arena-backed Hessian2 value model.
//!
//! # Responsibilities
//! - Represent every value the bridge exchanges with a Dubbo service
//! - Express shared and cyclic structures through `Ref` back-references
//!
//! # Design Decisions
//! - Nodes live in a flat `Vec` owned by a [`ValueTree`]; containers and refs hold
//!   [`NodeId`] indices instead of pointers
//! - Node identity is the index, so cycle detection is a set of indices
//! - Map entries are an ordered `Vec` of key/value ids; insertion order is preserved

use std::sync::Arc;

static NULL: Value = Value::Null;

/// Index of a node inside a [`ValueTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    /// Raw index into the arena.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Class definition shared by every instance of the same Java type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDef {
    pub type_name: String,
    pub field_names: Vec<String>,
}

impl ClassDef {
    pub fn new(type_name: impl Into<String>, field_names: Vec<String>) -> Self {
        Self {
            type_name: type_name.into(),
            field_names,
        }
    }
}

/// A single node of the value tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
    /// Milliseconds since the Unix epoch.
    Date(i64),
    List {
        type_name: Option<String>,
        items: Vec<NodeId>,
    },
    Map {
        type_name: Option<String>,
        entries: Vec<(NodeId, NodeId)>,
    },
    /// Instance of a class. `def` is `None` when the stream carried no definition.
    /// `fields` may be shorter or longer than `def.field_names`.
    Object {
        def: Option<Arc<ClassDef>>,
        fields: Vec<NodeId>,
    },
    Ref(NodeId),
}

impl Value {
    /// Short kind name used in logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Binary(_) => "binary",
            Value::Date(_) => "date",
            Value::List { type_name: None, .. } => "untyped list",
            Value::List { .. } => "typed list",
            Value::Map { type_name: None, .. } => "untyped map",
            Value::Map { .. } => "typed map",
            Value::Object { .. } => "object",
            Value::Ref(_) => "ref",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }
}

/// Owner of all nodes of one value plus the id of its root.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueTree {
    nodes: Vec<Value>,
    root: NodeId,
}

impl ValueTree {
    /// A tree holding a single `Null`.
    pub fn null() -> Self {
        Self::scalar(Value::Null)
    }

    /// A tree whose root is the given node. Container ids inside `value` must not be used.
    pub fn scalar(value: Value) -> Self {
        Self {
            nodes: vec![value],
            root: NodeId(0),
        }
    }

    /// An empty arena; the root is fixed with [`ValueTree::set_root`] once built.
    pub fn empty() -> Self {
        Self {
            nodes: Vec::new(),
            root: NodeId(0),
        }
    }

    /// Append a node and return its id.
    pub fn push(&mut self, value: Value) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(value);
        id
    }

    /// Id the next [`ValueTree::push`] will return.
    pub fn next_id(&self) -> NodeId {
        NodeId(self.nodes.len() as u32)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn set_root(&mut self, root: NodeId) {
        self.root = root;
    }

    pub fn root_value(&self) -> &Value {
        self.get(self.root)
    }

    /// Node lookup. Ids always come from this tree, so an unknown id reads as `Null`.
    pub fn get(&self, id: NodeId) -> &Value {
        self.nodes.get(id.index()).unwrap_or(&NULL)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Value> {
        self.nodes.get_mut(id.index())
    }

    pub(crate) fn replace(&mut self, id: NodeId, value: Value) {
        if let Some(slot) = self.nodes.get_mut(id.index()) {
            *slot = value;
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Follow `Ref` chains until a non-ref node or a loop is found.
    pub fn resolve(&self, mut id: NodeId) -> NodeId {
        let mut hops = 0;
        while let Value::Ref(target) = self.get(id) {
            if hops > self.nodes.len() {
                break;
            }
            id = *target;
            hops += 1;
        }
        id
    }

    /// Look up a map value by string key.
    pub fn map_get(&self, map: NodeId, key: &str) -> Option<NodeId> {
        match self.get(map) {
            Value::Map { entries, .. } => entries
                .iter()
                .find(|(k, _)| self.get(*k).as_str() == Some(key))
                .map(|(_, v)| *v),
            _ => None,
        }
    }
}

impl Default for ValueTree {
    fn default() -> Self {
        Self::null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_assigns_sequential_ids() {
        let mut tree = ValueTree::empty();
        let a = tree.push(Value::Int(1));
        let b = tree.push(Value::Int(2));
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn map_get_matches_string_keys_only() {
        let mut tree = ValueTree::empty();
        let k1 = tree.push(Value::String("a".into()));
        let v1 = tree.push(Value::Int(1));
        let k2 = tree.push(Value::Bool(true));
        let v2 = tree.push(Value::Int(2));
        let map = tree.push(Value::Map {
            type_name: None,
            entries: vec![(k1, v1), (k2, v2)],
        });
        tree.set_root(map);

        assert_eq!(tree.map_get(map, "a"), Some(v1));
        assert_eq!(tree.map_get(map, "true"), None);
    }

    #[test]
    fn resolve_stops_on_ref_loop() {
        let mut tree = ValueTree::empty();
        tree.push(Value::Ref(NodeId(1)));
        tree.push(Value::Ref(NodeId(0)));
        let end = tree.resolve(NodeId(0));
        assert!(matches!(tree.get(end), Value::Ref(_)));
    }

    #[test]
    fn unknown_id_reads_as_null() {
        let tree = ValueTree::null();
        assert_eq!(tree.get(NodeId(42)), &Value::Null);
    }
}
