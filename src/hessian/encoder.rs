//! Hessian2 writer.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};

use crate::hessian::value::{ClassDef, NodeId, Value, ValueTree};

const STRING_CHUNK: usize = 0x8000;
const BINARY_CHUNK: usize = 0x8000;

/// Streams Hessian2 values into a caller-owned buffer.
///
/// Type names, class definitions and container references are tracked for the
/// lifetime of the encoder, so one encoder must be used per Hessian stream.
pub struct Encoder<'b> {
    buf: &'b mut BytesMut,
    types: HashMap<String, i32>,
    classes: HashMap<(String, Vec<String>), i32>,
    refs: HashMap<NodeId, i32>,
    ref_count: i32,
}

impl<'b> Encoder<'b> {
    pub fn new(buf: &'b mut BytesMut) -> Self {
        Self {
            buf,
            types: HashMap::new(),
            classes: HashMap::new(),
            refs: HashMap::new(),
            ref_count: 0,
        }
    }

    pub fn write_null(&mut self) {
        self.buf.put_u8(b'N');
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(if value { b'T' } else { b'F' });
    }

    pub fn write_int(&mut self, value: i32) {
        if (-16..=47).contains(&value) {
            self.buf.put_u8((0x90 + value) as u8);
        } else if (-2048..=2047).contains(&value) {
            self.buf.put_u8((0xc8 + (value >> 8)) as u8);
            self.buf.put_u8(value as u8);
        } else if (-262_144..=262_143).contains(&value) {
            self.buf.put_u8((0xd4 + (value >> 16)) as u8);
            self.buf.put_u16(value as u16);
        } else {
            self.buf.put_u8(b'I');
            self.buf.put_i32(value);
        }
    }

    pub fn write_long(&mut self, value: i64) {
        if (-8..=15).contains(&value) {
            self.buf.put_u8((0xe0 + value) as u8);
        } else if (-2048..=2047).contains(&value) {
            self.buf.put_u8((0xf8 + (value >> 8)) as u8);
            self.buf.put_u8(value as u8);
        } else if (-262_144..=262_143).contains(&value) {
            self.buf.put_u8((0x3c + (value >> 16)) as u8);
            self.buf.put_u16(value as u16);
        } else if i32::try_from(value).is_ok() {
            self.buf.put_u8(0x59);
            self.buf.put_i32(value as i32);
        } else {
            self.buf.put_u8(b'L');
            self.buf.put_i64(value);
        }
    }

    pub fn write_double(&mut self, value: f64) {
        if value == 0.0 {
            self.buf.put_u8(0x5b);
            return;
        }
        if value == 1.0 {
            self.buf.put_u8(0x5c);
            return;
        }

        let whole = value as i64;
        if whole as f64 == value {
            if (-128..=127).contains(&whole) {
                self.buf.put_u8(0x5d);
                self.buf.put_i8(whole as i8);
                return;
            }
            if (-32768..=32767).contains(&whole) {
                self.buf.put_u8(0x5e);
                self.buf.put_i16(whole as i16);
                return;
            }
        }

        // Readers rebuild the value as `0.001 * mills`, so only use the form when that is exact.
        let mills = (value * 1000.0) as i32;
        if 0.001 * mills as f64 == value {
            self.buf.put_u8(0x5f);
            self.buf.put_i32(mills);
            return;
        }

        self.buf.put_u8(b'D');
        self.buf.put_f64(value);
    }

    pub fn write_date(&mut self, millis: i64) {
        if millis % 60_000 == 0 {
            if let Ok(minutes) = i32::try_from(millis / 60_000) {
                self.buf.put_u8(0x4b);
                self.buf.put_i32(minutes);
                return;
            }
        }
        self.buf.put_u8(0x4a);
        self.buf.put_i64(millis);
    }

    /// Strings are sized in UTF-16 code units and written as CESU-8, as Java peers expect.
    pub fn write_string(&mut self, value: &str) {
        let units: Vec<u16> = value.encode_utf16().collect();
        let mut rest: &[u16] = &units;

        while rest.len() > STRING_CHUNK {
            let (head, tail) = rest.split_at(STRING_CHUNK);
            self.buf.put_u8(b'R');
            self.buf.put_u16(STRING_CHUNK as u16);
            self.put_units(head);
            rest = tail;
        }

        let len = rest.len();
        if len <= 31 {
            self.buf.put_u8(len as u8);
        } else if len <= 1023 {
            self.buf.put_u8(0x30 + (len >> 8) as u8);
            self.buf.put_u8(len as u8);
        } else {
            self.buf.put_u8(b'S');
            self.buf.put_u16(len as u16);
        }
        self.put_units(rest);
    }

    fn put_units(&mut self, units: &[u16]) {
        for &unit in units {
            if unit < 0x80 {
                self.buf.put_u8(unit as u8);
            } else if unit < 0x800 {
                self.buf.put_u8(0xc0 | (unit >> 6) as u8);
                self.buf.put_u8(0x80 | (unit & 0x3f) as u8);
            } else {
                self.buf.put_u8(0xe0 | (unit >> 12) as u8);
                self.buf.put_u8(0x80 | ((unit >> 6) & 0x3f) as u8);
                self.buf.put_u8(0x80 | (unit & 0x3f) as u8);
            }
        }
    }

    pub fn write_binary(&mut self, value: &[u8]) {
        let mut rest = value;
        while rest.len() > BINARY_CHUNK {
            let (head, tail) = rest.split_at(BINARY_CHUNK);
            self.buf.put_u8(b'A');
            self.buf.put_u16(BINARY_CHUNK as u16);
            self.buf.put_slice(head);
            rest = tail;
        }

        let len = rest.len();
        if len <= 15 {
            self.buf.put_u8(0x20 + len as u8);
        } else if len <= 1023 {
            self.buf.put_u8(0x34 + (len >> 8) as u8);
            self.buf.put_u8(len as u8);
        } else {
            self.buf.put_u8(b'B');
            self.buf.put_u16(len as u16);
        }
        self.buf.put_slice(rest);
    }

    /// Header of an untyped fixed-length list. The caller writes `len` values next.
    pub fn write_list_begin(&mut self, len: usize) {
        self.ref_count += 1;
        self.put_untyped_list_header(len);
    }

    fn put_untyped_list_header(&mut self, len: usize) {
        if len <= 7 {
            self.buf.put_u8(0x78 + len as u8);
        } else {
            self.buf.put_u8(0x58);
            self.write_int(len as i32);
        }
    }

    /// Open an untyped map. Entries follow as key/value pairs, closed by [`Encoder::write_map_end`].
    pub fn write_map_begin(&mut self) {
        self.ref_count += 1;
        self.buf.put_u8(b'H');
    }

    pub fn write_map_end(&mut self) {
        self.buf.put_u8(b'Z');
    }

    fn write_type(&mut self, type_name: &str) {
        if let Some(index) = self.types.get(type_name) {
            let index = *index;
            self.write_int(index);
            return;
        }
        let index = self.types.len() as i32;
        self.types.insert(type_name.to_string(), index);
        self.write_string(type_name);
    }

    /// Write the root of `tree` and everything reachable from it.
    pub fn write_tree(&mut self, tree: &ValueTree) {
        // Node ids are only meaningful inside their own tree; the stream-wide counter stays.
        self.refs.clear();
        self.write_node(tree, tree.root());
    }

    fn register(&mut self, id: NodeId) {
        self.refs.insert(id, self.ref_count);
        self.ref_count += 1;
    }

    fn write_node(&mut self, tree: &ValueTree, id: NodeId) {
        match tree.get(id) {
            Value::Null => self.write_null(),
            Value::Bool(v) => self.write_bool(*v),
            Value::Int(v) => self.write_int(*v),
            Value::Long(v) => self.write_long(*v),
            Value::Double(v) => self.write_double(*v),
            Value::String(v) => self.write_string(v),
            Value::Binary(v) => self.write_binary(v),
            Value::Date(v) => self.write_date(*v),
            Value::List { type_name, items } => {
                self.register(id);
                match type_name {
                    Some(name) if items.len() <= 7 => {
                        self.buf.put_u8(0x70 + items.len() as u8);
                        self.write_type(name);
                    }
                    Some(name) => {
                        self.buf.put_u8(0x56);
                        self.write_type(name);
                        self.write_int(items.len() as i32);
                    }
                    None => self.put_untyped_list_header(items.len()),
                }
                for item in items {
                    self.write_node(tree, *item);
                }
            }
            Value::Map { type_name, entries } => {
                self.register(id);
                match type_name {
                    Some(name) => {
                        self.buf.put_u8(b'M');
                        self.write_type(name);
                    }
                    None => self.buf.put_u8(b'H'),
                }
                for (key, value) in entries {
                    self.write_node(tree, *key);
                    self.write_node(tree, *value);
                }
                self.buf.put_u8(b'Z');
            }
            Value::Object { def: None, .. } => self.write_null(),
            Value::Object {
                def: Some(def),
                fields,
            } => self.write_object(tree, id, def, fields),
            Value::Ref(target) => {
                if let Some(index) = self.refs.get(target) {
                    let index = *index;
                    self.buf.put_u8(0x51);
                    self.write_int(index);
                    return;
                }
                let resolved = tree.resolve(*target);
                if matches!(tree.get(resolved), Value::Ref(_)) {
                    self.write_null();
                } else {
                    self.write_node(tree, resolved);
                }
            }
        }
    }

    fn write_object(&mut self, tree: &ValueTree, id: NodeId, def: &Arc<ClassDef>, fields: &[NodeId]) {
        let key = (def.type_name.clone(), def.field_names.clone());
        let index = match self.classes.get(&key) {
            Some(index) => *index,
            None => {
                let index = self.classes.len() as i32;
                self.buf.put_u8(b'C');
                self.write_string(&def.type_name);
                self.write_int(def.field_names.len() as i32);
                for name in &def.field_names {
                    self.write_string(name);
                }
                self.classes.insert(key, index);
                index
            }
        };

        if index < 16 {
            self.buf.put_u8(0x60 + index as u8);
        } else {
            self.buf.put_u8(b'O');
            self.write_int(index);
        }
        self.register(id);

        for position in 0..def.field_names.len() {
            match fields.get(position) {
                Some(field) => self.write_node(tree, *field),
                None => self.write_null(),
            }
        }
    }
}
