//! JSON → Hessian value conversion driven by declared Java parameter types.
//!
//! Known type names map to a [`Policy`]; everything else is converted structurally.

use serde_json::Value as Json;

use crate::error::{BridgeError, BridgeResult};
use crate::hessian::{NodeId, Value, ValueTree};

/// Nesting depth beyond which structural conversion yields `Null`.
pub const MAX_CONVERT_DEPTH: usize = 50;

/// Shape a JSON value must have for a declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Bool,
    Number,
    /// Integer fitting in 32 bits.
    Int,
    /// Integer fitting in 64 bits.
    Int64,
    Array,
    Object,
    Null,
    NonEmptyString,
}

impl Kind {
    fn matches(self, json: &Json) -> bool {
        match self {
            Kind::Bool => json.is_boolean(),
            Kind::Number => json.is_number(),
            Kind::Int => json
                .as_i64()
                .map(|v| i32::try_from(v).is_ok())
                .unwrap_or(false),
            Kind::Int64 => json.is_i64(),
            Kind::Array => json.is_array(),
            Kind::Object => json.is_object(),
            Kind::Null => json.is_null(),
            Kind::NonEmptyString => json.as_str().map(|s| !s.is_empty()).unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Policy {
    /// Native kind must match; a JSON string is re-parsed once and checked again.
    Loadable { kind: Kind, nullable: bool },
    /// Native kind must match, one of up to two accepted kinds.
    Strict {
        accept: Kind,
        or: Option<Kind>,
        nullable: bool,
    },
    /// Anything goes; non-strings become their compact JSON text.
    Text,
}

impl Policy {
    const fn loadable(kind: Kind) -> Self {
        Policy::Loadable {
            kind,
            nullable: false,
        }
    }

    const fn boxed(kind: Kind) -> Self {
        Policy::Loadable {
            kind,
            nullable: true,
        }
    }

    fn accepts(self, json: &Json) -> bool {
        match self {
            Policy::Loadable { kind, nullable } => kind.matches(json) || (nullable && json.is_null()),
            Policy::Strict {
                accept,
                or,
                nullable,
            } => {
                accept.matches(json)
                    || or.map(|k| k.matches(json)).unwrap_or(false)
                    || (nullable && json.is_null())
            }
            Policy::Text => true,
        }
    }
}

fn policy_for(type_name: &str) -> Option<Policy> {
    let strict = |or, nullable| Policy::Strict {
        accept: Kind::NonEmptyString,
        or,
        nullable,
    };
    Some(match type_name {
        "java.lang.Boolean" => Policy::boxed(Kind::Bool),
        "boolean" => Policy::loadable(Kind::Bool),

        "java.lang.Float" | "java.lang.Double" => Policy::boxed(Kind::Number),
        "float" | "double" => Policy::loadable(Kind::Number),

        "java.lang.Byte" | "java.lang.Short" => Policy::boxed(Kind::Int),
        "byte" | "short" => Policy::loadable(Kind::Int),

        "java.lang.Integer" | "java.lang.Long" => Policy::boxed(Kind::Int64),
        "int" | "long" => Policy::loadable(Kind::Int64),

        "java.lang.String" => Policy::Text,

        "java.lang.Character" | "java.lang.Enum" | "java.time.DayOfWeek" => strict(None, true),
        "char" => strict(None, false),

        "java.util.Date" | "java.math.BigDecimal" | "java.math.BigInteger" => {
            strict(Some(Kind::Number), true)
        }

        "java.lang.Void" => Policy::Strict {
            accept: Kind::Null,
            or: None,
            nullable: false,
        },

        "java.util.List"
        | "java.util.ArrayList"
        | "java.util.LinkedList"
        | "com.alibaba.fastjson.JSONArray"
        | "java.util.Set"
        | "java.util.HashSet"
        | "java.util.TreeSet"
        | "java.util.LinkedHashSet" => Policy::boxed(Kind::Array),

        "java.util.Map" | "java.util.HashMap" | "java.util.TreeMap" | "java.util.LinkedHashMap" => {
            Policy::boxed(Kind::Object)
        }

        _ => return None,
    })
}

/// Convert `json` into a value tree for a parameter declared as `type_name`.
pub fn convert(json: &Json, type_name: &str, ignore_null_map_pair: bool) -> BridgeResult<ValueTree> {
    let Some(policy) = policy_for(type_name) else {
        return Ok(structural(json, ignore_null_map_pair));
    };

    if policy.accepts(json) {
        return Ok(match (policy, json) {
            (Policy::Text, Json::Null) | (Policy::Text, Json::String(_)) => {
                structural(json, ignore_null_map_pair)
            }
            (Policy::Text, other) => ValueTree::scalar(Value::String(compact(other))),
            _ => structural(json, ignore_null_map_pair),
        });
    }

    if let (Policy::Loadable { .. }, Json::String(text)) = (policy, json) {
        if let Ok(inner) = serde_json::from_str::<Json>(text) {
            if policy.accepts(&inner) {
                return Ok(structural(&inner, ignore_null_map_pair));
            }
        }
    }

    Err(BridgeError::InvalidValue {
        type_name: type_name.to_string(),
        raw: compact(json),
    })
}

/// How a plain-text argument (query, form field, text body) is read for a declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextRule {
    Bool,
    Double,
    Int,
    Long,
    /// Non-empty text kept as a string.
    Symbol,
    String,
    Void,
}

fn text_rule(type_name: &str) -> Option<(TextRule, bool)> {
    Some(match type_name {
        "java.lang.Boolean" => (TextRule::Bool, true),
        "boolean" => (TextRule::Bool, false),
        "java.lang.Float" | "java.lang.Double" => (TextRule::Double, true),
        "float" | "double" => (TextRule::Double, false),
        "java.lang.Byte" | "java.lang.Short" | "java.lang.Integer" => (TextRule::Int, true),
        "byte" | "short" | "int" => (TextRule::Int, false),
        "java.lang.Long" => (TextRule::Long, true),
        "long" => (TextRule::Long, false),
        "java.lang.Character"
        | "java.lang.Enum"
        | "java.math.BigDecimal"
        | "java.math.BigInteger"
        | "java.time.DayOfWeek" => (TextRule::Symbol, true),
        "char" => (TextRule::Symbol, false),
        "java.lang.String" => (TextRule::String, true),
        "java.lang.Void" => (TextRule::Void, true),
        _ => return None,
    })
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

/// Convert a plain-text argument for a parameter declared as `type_name`.
///
/// Known scalar types parse the text directly and accept the literal `null`
/// when the Java type is nullable. Any other type must be JSON text.
pub fn convert_text(text: &str, type_name: &str, ignore_null_map_pair: bool) -> BridgeResult<ValueTree> {
    let invalid = |message: &str| BridgeError::InvalidArguments(message.to_string());

    let Some((rule, nullable)) = text_rule(type_name) else {
        if text.is_empty() {
            return Err(invalid("empty string is not valid for this parameter"));
        }
        let json: Json = serde_json::from_str(text).map_err(|_| {
            invalid("complex type is not valid Json string and please check your type")
        })?;
        return Ok(structural(&json, ignore_null_map_pair));
    };

    match rule {
        TextRule::Void => return Ok(ValueTree::null()),
        TextRule::String if text == "null" => return Ok(ValueTree::null()),
        TextRule::String => return Ok(ValueTree::scalar(Value::String(text.to_string()))),
        _ => {}
    }

    if !nullable && (text.is_empty() || text == "null") {
        return Err(invalid("empty string or null is not valid for this parameter"));
    }
    if text.is_empty() {
        return Err(invalid("empty string is not valid for this parameter"));
    }
    if text == "null" {
        return Ok(ValueTree::null());
    }

    let value = match rule {
        TextRule::Bool => parse_bool(text).map(Value::Bool),
        TextRule::Double => text.trim().parse().ok().map(Value::Double),
        TextRule::Int => text.trim().parse().ok().map(Value::Int),
        TextRule::Long => text.trim().parse().ok().map(Value::Long),
        _ => Some(Value::String(text.to_string())),
    };
    value.map(ValueTree::scalar).ok_or_else(|| {
        BridgeError::InvalidArguments(format!("invalid value '{text}' for type '{type_name}'"))
    })
}

/// Untyped conversion: objects become untyped maps, arrays untyped lists.
pub fn structural(json: &Json, ignore_null_map_pair: bool) -> ValueTree {
    let mut tree = ValueTree::empty();
    let root = push_json(&mut tree, json, ignore_null_map_pair, 0);
    tree.set_root(root);
    tree
}

fn push_json(tree: &mut ValueTree, json: &Json, ignore_null: bool, depth: usize) -> NodeId {
    if depth >= MAX_CONVERT_DEPTH {
        return tree.push(Value::Null);
    }

    match json {
        Json::Null => tree.push(Value::Null),
        Json::Bool(b) => tree.push(Value::Bool(*b)),
        Json::Number(n) => {
            let value = match n.as_i64() {
                Some(v) => match i32::try_from(v) {
                    Ok(small) => Value::Int(small),
                    Err(_) => Value::Long(v),
                },
                None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
            };
            tree.push(value)
        }
        Json::String(s) => tree.push(Value::String(s.clone())),
        Json::Array(items) => {
            let items = items
                .iter()
                .map(|item| push_json(tree, item, ignore_null, depth + 1))
                .collect();
            tree.push(Value::List {
                type_name: None,
                items,
            })
        }
        Json::Object(members) => {
            let mut entries = Vec::with_capacity(members.len());
            for (name, member) in members {
                if ignore_null && member.is_null() {
                    continue;
                }
                let key = tree.push(Value::String(name.clone()));
                let value = push_json(tree, member, ignore_null, depth + 1);
                entries.push((key, value));
            }
            tree.push(Value::Map {
                type_name: None,
                entries,
            })
        }
    }
}

/// Compact JSON text used in messages and for string passthrough.
pub fn compact(json: &Json) -> String {
    serde_json::to_string(json).unwrap_or_default()
}
