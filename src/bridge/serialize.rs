//! Hessian value → JSON text.
//!
//! # Design Decisions
//! - JSON is written straight into a `String`; `serde_json` only formats strings and
//!   doubles so escaping matches what clients parse
//! - The cycle guard holds the ids of containers and refs currently on the descent path,
//!   so a shared sub-tree referenced twice is still written twice
//! - Well-known Java classes are a closed enum matched by type name

use std::collections::HashSet;
use std::fmt::Write as _;

use crate::error::{BridgeError, BridgeResult};
use crate::hessian::{ClassDef, NodeId, Value, ValueTree};

/// Serialize the root of `tree`.
pub fn to_json_string(tree: &ValueTree) -> BridgeResult<String> {
    node_to_json_string(tree, tree.root())
}

/// Serialize one node of `tree` with a fresh cycle guard.
pub fn node_to_json_string(tree: &ValueTree, id: NodeId) -> BridgeResult<String> {
    let mut serializer = Serializer {
        tree,
        out: String::new(),
        visited: HashSet::new(),
    };
    serializer.write(id)?;
    Ok(serializer.out)
}

/// Append `text` as a quoted JSON string.
pub(crate) fn push_json_str(out: &mut String, text: &str) {
    match serde_json::to_string(text) {
        Ok(quoted) => out.push_str(&quoted),
        Err(_) => out.push_str("\"\""),
    }
}

fn push_f64(out: &mut String, value: f64) {
    match serde_json::Number::from_f64(value) {
        Some(number) => {
            let _ = write!(out, "{number}");
        }
        None => out.push_str("null"),
    }
}

/// Classes with a dedicated JSON rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClassConverter {
    SqlDate,
    AtomicInteger,
    AtomicLong,
    BigDecimal,
    BigInteger,
}

impl ClassConverter {
    fn lookup(type_name: &str) -> Option<Self> {
        Some(match type_name {
            "java.sql.Date" | "java.sql.Time" | "java.sql.Timestamp" => ClassConverter::SqlDate,
            "java.util.concurrent.atomic.AtomicInteger" => ClassConverter::AtomicInteger,
            "java.util.concurrent.atomic.AtomicLong" => ClassConverter::AtomicLong,
            "java.math.BigDecimal" => ClassConverter::BigDecimal,
            "java.math.BigInteger" => ClassConverter::BigInteger,
            _ => return None,
        })
    }
}

struct Serializer<'t> {
    tree: &'t ValueTree,
    out: String,
    visited: HashSet<NodeId>,
}

impl Serializer<'_> {
    fn write(&mut self, id: NodeId) -> BridgeResult<()> {
        let tree = self.tree;
        match tree.get(id) {
            Value::Null => self.out.push_str("null"),
            Value::Bool(v) => self.out.push_str(if *v { "true" } else { "false" }),
            Value::Int(v) => {
                let _ = write!(self.out, "{v}");
            }
            Value::Long(v) | Value::Date(v) => {
                let _ = write!(self.out, "{v}");
            }
            Value::Double(v) => push_f64(&mut self.out, *v),
            Value::String(s) => push_json_str(&mut self.out, s),
            // JSON has no byte type: bytes become a string and invalid UTF-8 is replaced
            // with U+FFFD. Renderers that need the exact bytes handle `Binary` roots themselves.
            Value::Binary(bytes) => push_json_str(&mut self.out, &String::from_utf8_lossy(bytes)),
            Value::List { items, .. } => {
                self.visited.insert(id);
                self.out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.out.push(',');
                    }
                    self.write(*item)?;
                }
                self.out.push(']');
                self.visited.remove(&id);
            }
            Value::Map { entries, .. } => {
                self.visited.insert(id);
                self.out.push('{');
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        self.out.push(',');
                    }
                    match tree.get(*key) {
                        Value::String(name) => push_json_str(&mut self.out, name),
                        _ => {
                            let name = node_to_json_string(tree, *key)?;
                            push_json_str(&mut self.out, &name);
                        }
                    }
                    self.out.push(':');
                    self.write(*value)?;
                }
                self.out.push('}');
                self.visited.remove(&id);
            }
            Value::Object { def, fields } => {
                self.visited.insert(id);
                let result = match def {
                    Some(def) => self.write_object(def, fields),
                    None => {
                        self.out.push_str("null");
                        Ok(())
                    }
                };
                self.visited.remove(&id);
                result?;
            }
            Value::Ref(target) => {
                if self.visited.contains(target) {
                    self.out.push_str("null");
                } else {
                    self.visited.insert(id);
                    let result = self.write(*target);
                    self.visited.remove(&id);
                    result?;
                }
            }
        }
        Ok(())
    }

    fn write_object(&mut self, def: &ClassDef, fields: &[NodeId]) -> BridgeResult<()> {
        let Some(converter) = ClassConverter::lookup(&def.type_name) else {
            self.out.push('{');
            for (i, (name, value)) in def.field_names.iter().zip(fields).enumerate() {
                if i > 0 {
                    self.out.push(',');
                }
                push_json_str(&mut self.out, name);
                self.out.push(':');
                self.write(*value)?;
            }
            self.out.push('}');
            return Ok(());
        };

        let tree = self.tree;
        let text = match converter {
            ClassConverter::SqlDate => match self.single_value(def, fields)? {
                Value::Date(millis) => Some(millis.to_string()),
                _ => None,
            },
            ClassConverter::AtomicInteger => match self.single_value(def, fields)? {
                Value::Int(v) => Some(v.to_string()),
                _ => None,
            },
            ClassConverter::AtomicLong => match self.single_value(def, fields)? {
                Value::Long(v) => Some(v.to_string()),
                Value::Int(v) => Some(v.to_string()),
                _ => None,
            },
            ClassConverter::BigDecimal => match self.single_value(def, fields)? {
                Value::String(digits) => Some(digits.clone()),
                _ => None,
            },
            ClassConverter::BigInteger => big_integer(tree, def, fields),
        };
        self.out.push_str(text.as_deref().unwrap_or("null"));
        Ok(())
    }

    /// The only field of a `{ value }` wrapper class, refs followed.
    fn single_value(&self, def: &ClassDef, fields: &[NodeId]) -> BridgeResult<&Value> {
        if def.field_names.len() != 1 || def.field_names[0] != "value" {
            return Err(BridgeError::UnknownTypeDefinition(def.type_name.clone()));
        }
        if fields.len() != 1 {
            return Err(BridgeError::FieldCountMismatch {
                type_name: def.type_name.clone(),
                actual: fields.len(),
            });
        }
        Ok(self.tree.get(self.tree.resolve(fields[0])))
    }
}

/// Rebuild a `java.math.BigInteger` from its `signum` and `mag` fields.
///
/// Returns the JSON text: a number when it fits `i64`, a quoted string otherwise.
fn big_integer(tree: &ValueTree, def: &ClassDef, fields: &[NodeId]) -> Option<String> {
    let mag_index = def.field_names.iter().position(|n| n == "mag")?;
    let sig_index = def.field_names.iter().position(|n| n == "signum")?;
    let mag = *fields.get(mag_index)?;
    let sig = *fields.get(sig_index)?;

    let signum = tree.get(tree.resolve(sig)).as_int()?;
    if signum == 0 {
        return Some("0".to_string());
    }

    let Value::List { items, .. } = tree.get(tree.resolve(mag)) else {
        return None;
    };
    let mut words = items
        .iter()
        .map(|item| {
            tree.get(tree.resolve(*item))
                .as_int()
                .map(|v| u64::from(v as u32))
        })
        .collect::<Option<Vec<u64>>>()?;
    if words.is_empty() {
        return None;
    }

    let mut text = String::with_capacity(words.len() * 10 + 1);
    if signum < 0 {
        text.push('-');
    }
    text.push_str(&magnitude_to_decimal(&mut words));

    match text.parse::<i64>() {
        Ok(value) => Some(value.to_string()),
        Err(_) => {
            let mut quoted = String::with_capacity(text.len() + 2);
            push_json_str(&mut quoted, &text);
            Some(quoted)
        }
    }
}

const BILLION: u64 = 1_000_000_000;

/// Divide the big-endian 32-bit word array by 10^9 in place and return the remainder.
///
/// `from` advances past leading words that became zero.
fn divide_by_billion(words: &mut [u64], from: &mut usize) -> u64 {
    let mut remainder = 0u64;
    let mut seen_non_zero = false;
    for i in *from..words.len() {
        let dividend = (remainder << 32) | words[i];
        let quotient = dividend / BILLION;
        remainder = dividend - quotient * BILLION;
        if quotient == 0 {
            if !seen_non_zero {
                *from = i + 1;
            }
        } else {
            seen_non_zero = true;
        }
        words[i] = quotient;
    }
    remainder
}

fn magnitude_to_decimal(words: &mut [u64]) -> String {
    let mut groups = Vec::with_capacity(words.len() + 1);
    let mut from = 0;
    while from < words.len() {
        groups.push(divide_by_billion(words, &mut from));
    }

    let mut text = String::with_capacity(groups.len() * 9);
    for (i, group) in groups.iter().rev().enumerate() {
        if i == 0 {
            let _ = write!(text, "{group}");
        } else {
            let _ = write!(text, "{group:09}");
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn class(tree: &mut ValueTree, type_name: &str, names: &[&str], fields: Vec<NodeId>) -> NodeId {
        let def = ClassDef::new(type_name, names.iter().map(|n| n.to_string()).collect());
        tree.push(Value::Object {
            def: Some(Arc::new(def)),
            fields,
        })
    }

    fn big_integer_tree(signum: i32, mag: &[i32]) -> ValueTree {
        let mut tree = ValueTree::empty();
        let items = mag.iter().map(|w| tree.push(Value::Int(*w))).collect();
        let mag = tree.push(Value::List {
            type_name: Some("[int".into()),
            items,
        });
        let sig = tree.push(Value::Int(signum));
        let root = class(
            &mut tree,
            "java.math.BigInteger",
            &["signum", "mag", "bitCount"],
            vec![sig, mag],
        );
        tree.set_root(root);
        tree
    }

    #[test]
    fn primitives() {
        let json = |v| to_json_string(&ValueTree::scalar(v)).unwrap();
        assert_eq!(json(Value::Null), "null");
        assert_eq!(json(Value::Bool(false)), "false");
        assert_eq!(json(Value::Long(i64::MAX)), "9223372036854775807");
        assert_eq!(json(Value::Double(1.5)), "1.5");
        assert_eq!(json(Value::Date(1_700_000_000_000)), "1700000000000");
        assert_eq!(json(Value::String("a\"b".into())), "\"a\\\"b\"");
        assert_eq!(json(Value::Binary(vec![])), "\"\"");
        assert_eq!(
            json(Value::Binary(vec![1, 2, 3, 4])),
            "\"\\u0001\\u0002\\u0003\\u0004\""
        );
    }

    #[test]
    fn non_utf8_binary_is_replaced_in_json() {
        let tree = ValueTree::scalar(Value::Binary(vec![b'o', 0xff, b'k']));
        assert_eq!(to_json_string(&tree).unwrap(), "\"o\u{fffd}k\"");
    }

    #[test]
    fn non_string_keys_are_stringified() {
        let mut tree = ValueTree::empty();
        let key = tree.push(Value::Bool(false));
        let value = tree.push(Value::Int(45));
        let map = tree.push(Value::Map {
            type_name: Some("java.util.HashMap".into()),
            entries: vec![(key, value)],
        });
        tree.set_root(map);
        assert_eq!(to_json_string(&tree).unwrap(), "{\"false\":45}");
    }

    #[test]
    fn big_integer_beyond_i64_is_quoted() {
        let mag = [11214251, 22215215, 1234521515];
        assert_eq!(
            to_json_string(&big_integer_tree(1, &mag)).unwrap(),
            "\"206866418270755036052409771\""
        );
        assert_eq!(
            to_json_string(&big_integer_tree(-1, &mag)).unwrap(),
            "\"-206866418270755036052409771\""
        );
    }

    #[test]
    fn big_integer_small_values_are_numbers() {
        assert_eq!(to_json_string(&big_integer_tree(1, &[0, 7])).unwrap(), "7");
        assert_eq!(to_json_string(&big_integer_tree(-1, &[1, 0])).unwrap(), "-4294967296");
        assert_eq!(to_json_string(&big_integer_tree(1, &[-1])).unwrap(), "4294967295");
        assert_eq!(to_json_string(&big_integer_tree(0, &[99, 99])).unwrap(), "0");
    }

    #[test]
    fn big_integer_degrades_to_null() {
        assert_eq!(to_json_string(&big_integer_tree(1, &[])).unwrap(), "null");

        let mut tree = ValueTree::empty();
        let sig = tree.push(Value::Int(1));
        let root = class(&mut tree, "java.math.BigInteger", &["signum"], vec![sig]);
        tree.set_root(root);
        assert_eq!(to_json_string(&tree).unwrap(), "null");

        let mut tree = ValueTree::empty();
        let sig = tree.push(Value::String("1".into()));
        let mag = tree.push(Value::List {
            type_name: None,
            items: vec![],
        });
        let root = class(&mut tree, "java.math.BigInteger", &["signum", "mag"], vec![sig, mag]);
        tree.set_root(root);
        assert_eq!(to_json_string(&tree).unwrap(), "null");
    }

    #[test]
    fn big_decimal_is_raw_number() {
        let mut tree = ValueTree::empty();
        let digits = tree.push(Value::String("12345678901234567890.0001".into()));
        let root = class(&mut tree, "java.math.BigDecimal", &["value"], vec![digits]);
        tree.set_root(root);
        assert_eq!(to_json_string(&tree).unwrap(), "12345678901234567890.0001");
    }

    #[test]
    fn wrapper_classes() {
        let mut tree = ValueTree::empty();
        let millis = tree.push(Value::Date(86_400_000));
        let root = class(&mut tree, "java.sql.Timestamp", &["value"], vec![millis]);
        tree.set_root(root);
        assert_eq!(to_json_string(&tree).unwrap(), "86400000");

        let mut tree = ValueTree::empty();
        let v = tree.push(Value::Int(3));
        let root = class(&mut tree, "java.util.concurrent.atomic.AtomicInteger", &["value"], vec![v]);
        tree.set_root(root);
        assert_eq!(to_json_string(&tree).unwrap(), "3");

        let mut tree = ValueTree::empty();
        let v = tree.push(Value::String("x".into()));
        let root = class(&mut tree, "java.sql.Date", &["value"], vec![v]);
        tree.set_root(root);
        assert_eq!(to_json_string(&tree).unwrap(), "null");
    }

    #[test]
    fn wrapper_shape_errors_surface() {
        let mut tree = ValueTree::empty();
        let v = tree.push(Value::Long(1));
        let root = class(&mut tree, "java.util.concurrent.atomic.AtomicLong", &["val"], vec![v]);
        tree.set_root(root);
        assert_eq!(
            to_json_string(&tree).unwrap_err().to_string(),
            "Unknown type definition for: java.util.concurrent.atomic.AtomicLong"
        );

        let mut tree = ValueTree::empty();
        let root = class(&mut tree, "java.sql.Time", &["value"], vec![]);
        tree.set_root(root);
        assert_eq!(
            to_json_string(&tree).unwrap_err().to_string(),
            "Expected fields size: 1 but actual fields size: 0 for java.sql.Time"
        );
    }

    #[test]
    fn default_objects_use_shorter_side() {
        let mut tree = ValueTree::empty();
        let a = tree.push(Value::Int(1));
        let b = tree.push(Value::String("two".into()));
        let root = class(&mut tree, "com.example.Pair", &["left", "right", "extra"], vec![a, b]);
        tree.set_root(root);
        assert_eq!(
            to_json_string(&tree).unwrap(),
            "{\"left\":1,\"right\":\"two\"}"
        );

        let mut tree = ValueTree::empty();
        let a = tree.push(Value::Int(1));
        let b = tree.push(Value::Int(2));
        let root = class(&mut tree, "com.example.One", &["only"], vec![a, b]);
        tree.set_root(root);
        assert_eq!(to_json_string(&tree).unwrap(), "{\"only\":1}");

        let tree = ValueTree::scalar(Value::Object {
            def: None,
            fields: vec![],
        });
        assert_eq!(to_json_string(&tree).unwrap(), "null");
    }

    #[test]
    fn mutual_refs_serialize_to_null() {
        let mut tree = ValueTree::empty();
        let first = tree.push(Value::Null);
        let second = tree.push(Value::Ref(first));
        tree.replace(first, Value::Ref(second));
        tree.set_root(first);
        assert_eq!(to_json_string(&tree).unwrap(), "null");
    }

    #[test]
    fn self_referencing_list() {
        let mut tree = ValueTree::empty();
        let list = tree.next_id();
        let placeholder = tree.push(Value::Null);
        let back = tree.push(Value::Ref(list));
        tree.replace(
            placeholder,
            Value::List {
                type_name: None,
                items: vec![back],
            },
        );
        tree.set_root(list);
        assert_eq!(to_json_string(&tree).unwrap(), "[null]");
    }

    #[test]
    fn shared_nodes_are_written_each_time() {
        let mut tree = ValueTree::empty();
        let shared = tree.push(Value::List {
            type_name: None,
            items: vec![],
        });
        let again = tree.push(Value::Ref(shared));
        let root = tree.push(Value::List {
            type_name: None,
            items: vec![shared, again],
        });
        tree.set_root(root);
        assert_eq!(to_json_string(&tree).unwrap(), "[[],[]]");
    }
}
