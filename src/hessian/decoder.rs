//! Hessian2 reader.
//!
//! # Responsibilities
//! - Decode one value at a time from a borrowed byte slice
//! - Track the number of bytes consumed so callers can check frame bookkeeping
//! - Maintain the type, class-definition and reference tables of the stream
//!
//! # Design Decisions
//! - Containers are pushed into the arena before their children so `Ref` can point
//!   at an ancestor that is still being decoded
//! - Declared lengths are checked against the remaining input before allocating

use std::sync::Arc;

use thiserror::Error;

use crate::hessian::value::{ClassDef, NodeId, Value, ValueTree};

/// Maximum container nesting accepted from the wire.
pub const MAX_DEPTH: usize = 256;

/// Errors raised while reading Hessian2 data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HessianError {
    #[error("unexpected end of hessian data at offset {0}")]
    UnexpectedEof(usize),

    #[error("unknown hessian tag 0x{tag:02x} at offset {offset}")]
    UnknownTag { tag: u8, offset: usize },

    #[error("expected hessian {expected} at offset {offset} but found tag 0x{tag:02x}")]
    UnexpectedTag {
        expected: &'static str,
        tag: u8,
        offset: usize,
    },

    #[error("invalid hessian {kind} reference {index}")]
    InvalidReference { kind: &'static str, index: i64 },

    #[error("invalid hessian length {0}")]
    InvalidLength(i64),

    #[error("hessian value nested deeper than {0} levels")]
    TooDeep(usize),
}

pub type HessianResult<T> = Result<T, HessianError>;

/// Streaming Hessian2 decoder over a byte slice.
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    types: Vec<String>,
    classes: Vec<Arc<ClassDef>>,
    refs: Vec<NodeId>,
    depth: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            types: Vec::new(),
            classes: Vec::new(),
            refs: Vec::new(),
            depth: 0,
        }
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn peek(&self) -> HessianResult<u8> {
        self.buf
            .get(self.pos)
            .copied()
            .ok_or(HessianError::UnexpectedEof(self.pos))
    }

    fn byte(&mut self) -> HessianResult<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> HessianResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(HessianError::UnexpectedEof(self.buf.len()));
        }
        let buf = self.buf;
        let slice = &buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> HessianResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u16(&mut self) -> HessianResult<usize> {
        Ok(u16::from_be_bytes(self.array()?) as usize)
    }

    /// Read a value that must be an int.
    pub fn read_int(&mut self) -> HessianResult<i32> {
        let offset = self.pos;
        let tag = self.byte()?;
        match tag {
            0x80..=0xd7 | b'I' => self.finish_int(tag),
            _ => Err(HessianError::UnexpectedTag {
                expected: "int",
                tag,
                offset,
            }),
        }
    }

    /// Read a value that must be a string.
    pub fn read_string(&mut self) -> HessianResult<String> {
        let offset = self.pos;
        let tag = self.byte()?;
        match tag {
            0x00..=0x1f | 0x30..=0x33 | b'R' | b'S' => self.finish_string(tag),
            _ => Err(HessianError::UnexpectedTag {
                expected: "string",
                tag,
                offset,
            }),
        }
    }

    /// Decode the next complete value into its own tree.
    pub fn read_tree(&mut self) -> HessianResult<ValueTree> {
        self.refs.clear();
        self.depth = 0;
        let mut tree = ValueTree::empty();
        let root = self.read_node(&mut tree)?;
        tree.set_root(root);
        Ok(tree)
    }

    fn finish_int(&mut self, tag: u8) -> HessianResult<i32> {
        let tag_value = tag as i32;
        Ok(match tag {
            0x80..=0xbf => tag_value - 0x90,
            0xc0..=0xcf => ((tag_value - 0xc8) << 8) + self.byte()? as i32,
            0xd0..=0xd7 => {
                let [b0, b1] = self.array()?;
                ((tag_value - 0xd4) << 16) + ((b0 as i32) << 8) + b1 as i32
            }
            _ => i32::from_be_bytes(self.array()?),
        })
    }

    fn finish_long(&mut self, tag: u8) -> HessianResult<i64> {
        let tag_value = tag as i64;
        Ok(match tag {
            0xd8..=0xef => tag_value - 0xe0,
            0xf0..=0xff => ((tag_value - 0xf8) << 8) + self.byte()? as i64,
            0x38..=0x3f => {
                let [b0, b1] = self.array()?;
                ((tag_value - 0x3c) << 16) + ((b0 as i64) << 8) + b1 as i64
            }
            0x59 => i32::from_be_bytes(self.array()?) as i64,
            _ => i64::from_be_bytes(self.array()?),
        })
    }

    fn finish_double(&mut self, tag: u8) -> HessianResult<f64> {
        Ok(match tag {
            0x5b => 0.0,
            0x5c => 1.0,
            0x5d => i8::from_be_bytes(self.array()?) as f64,
            0x5e => i16::from_be_bytes(self.array()?) as f64,
            0x5f => 0.001 * i32::from_be_bytes(self.array()?) as f64,
            _ => f64::from_be_bytes(self.array()?),
        })
    }

    fn finish_string(&mut self, mut tag: u8) -> HessianResult<String> {
        let mut units: Vec<u16> = Vec::new();
        loop {
            let (len, last) = match tag {
                0x00..=0x1f => (tag as usize, true),
                0x30..=0x33 => ((((tag - 0x30) as usize) << 8) + self.byte()? as usize, true),
                b'S' => (self.u16()?, true),
                _ => (self.u16()?, false),
            };
            self.read_units(len, &mut units)?;
            if last {
                break;
            }
            let offset = self.pos;
            tag = self.byte()?;
            if !matches!(tag, 0x00..=0x1f | 0x30..=0x33 | b'R' | b'S') {
                return Err(HessianError::UnexpectedTag {
                    expected: "string chunk",
                    tag,
                    offset,
                });
            }
        }
        Ok(String::from_utf16_lossy(&units))
    }

    /// Read `count` UTF-16 units encoded as (modified) UTF-8.
    fn read_units(&mut self, count: usize, units: &mut Vec<u16>) -> HessianResult<()> {
        let mut left = count;
        while left > 0 {
            let lead = self.byte()? as u32;
            if lead < 0x80 {
                units.push(lead as u16);
                left -= 1;
            } else if lead & 0xe0 == 0xc0 {
                let b1 = self.byte()? as u32;
                units.push((((lead & 0x1f) << 6) | (b1 & 0x3f)) as u16);
                left -= 1;
            } else if lead & 0xf0 == 0xe0 {
                let [b1, b2] = self.array()?;
                units.push(
                    (((lead & 0x0f) << 12) | ((b1 as u32 & 0x3f) << 6) | (b2 as u32 & 0x3f))
                        as u16,
                );
                left -= 1;
            } else if lead & 0xf8 == 0xf0 {
                let [b1, b2, b3] = self.array()?;
                let code = ((lead & 0x07) << 18)
                    | ((b1 as u32 & 0x3f) << 12)
                    | ((b2 as u32 & 0x3f) << 6)
                    | (b3 as u32 & 0x3f);
                let mut pair = [0u16; 2];
                let encoded = char::from_u32(code)
                    .unwrap_or(char::REPLACEMENT_CHARACTER)
                    .encode_utf16(&mut pair);
                units.extend_from_slice(encoded);
                left = left.saturating_sub(2);
            } else {
                units.push(0xfffd);
                left -= 1;
            }
        }
        Ok(())
    }

    fn finish_binary(&mut self, mut tag: u8) -> HessianResult<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let (len, last) = match tag {
                0x20..=0x2f => ((tag - 0x20) as usize, true),
                0x34..=0x37 => ((((tag - 0x34) as usize) << 8) + self.byte()? as usize, true),
                b'B' => (self.u16()?, true),
                _ => (self.u16()?, false),
            };
            out.extend_from_slice(self.take(len)?);
            if last {
                break;
            }
            let offset = self.pos;
            tag = self.byte()?;
            if !matches!(tag, 0x20..=0x2f | 0x34..=0x37 | b'A' | b'B') {
                return Err(HessianError::UnexpectedTag {
                    expected: "binary chunk",
                    tag,
                    offset,
                });
            }
        }
        Ok(out)
    }

    fn read_type(&mut self) -> HessianResult<String> {
        let tag = self.peek()?;
        if matches!(tag, 0x00..=0x1f | 0x30..=0x33 | b'R' | b'S') {
            let name = self.read_string()?;
            self.types.push(name.clone());
            return Ok(name);
        }
        let index = self.read_int()?;
        usize::try_from(index)
            .ok()
            .and_then(|i| self.types.get(i).cloned())
            .ok_or(HessianError::InvalidReference {
                kind: "type",
                index: index as i64,
            })
    }

    fn read_length(&mut self) -> HessianResult<usize> {
        let len = self.read_int()?;
        self.check_length(len as i64)
    }

    fn check_length(&self, len: i64) -> HessianResult<usize> {
        // Every element takes at least one byte.
        if len < 0 || len as usize > self.remaining() {
            return Err(HessianError::InvalidLength(len));
        }
        Ok(len as usize)
    }

    fn read_class_def(&mut self) -> HessianResult<()> {
        let type_name = self.read_string()?;
        let count = self.read_length()?;
        let mut field_names = Vec::with_capacity(count);
        for _ in 0..count {
            field_names.push(self.read_string()?);
        }
        self.classes.push(Arc::new(ClassDef::new(type_name, field_names)));
        Ok(())
    }

    fn enter(&mut self) -> HessianResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(HessianError::TooDeep(MAX_DEPTH));
        }
        Ok(())
    }

    fn placeholder(&mut self, tree: &mut ValueTree) -> NodeId {
        let id = tree.push(Value::Null);
        self.refs.push(id);
        id
    }

    fn read_node(&mut self, tree: &mut ValueTree) -> HessianResult<NodeId> {
        let mut offset = self.pos;
        let mut tag = self.byte()?;

        // Class definitions precede the value that uses them.
        while tag == b'C' {
            self.read_class_def()?;
            offset = self.pos;
            tag = self.byte()?;
        }

        let value = match tag {
            b'N' => Value::Null,
            b'T' => Value::Bool(true),
            b'F' => Value::Bool(false),
            0x80..=0xd7 | b'I' => Value::Int(self.finish_int(tag)?),
            0xd8..=0xff | 0x38..=0x3f | 0x59 | b'L' => Value::Long(self.finish_long(tag)?),
            0x5b..=0x5f | b'D' => Value::Double(self.finish_double(tag)?),
            0x4a => Value::Date(i64::from_be_bytes(self.array()?)),
            0x4b => Value::Date(i32::from_be_bytes(self.array()?) as i64 * 60_000),
            0x00..=0x1f | 0x30..=0x33 | b'R' | b'S' => Value::String(self.finish_string(tag)?),
            0x20..=0x2f | 0x34..=0x37 | b'A' | b'B' => Value::Binary(self.finish_binary(tag)?),
            0x55..=0x58 | 0x70..=0x7f => return self.read_list(tree, tag),
            b'H' | b'M' => return self.read_map(tree, tag),
            b'O' | 0x60..=0x6f => return self.read_object(tree, tag),
            0x51 => {
                let index = self.read_int()?;
                let target = usize::try_from(index)
                    .ok()
                    .and_then(|i| self.refs.get(i).copied())
                    .ok_or(HessianError::InvalidReference {
                        kind: "value",
                        index: index as i64,
                    })?;
                Value::Ref(target)
            }
            _ => return Err(HessianError::UnknownTag { tag, offset }),
        };
        Ok(tree.push(value))
    }

    fn read_list(&mut self, tree: &mut ValueTree, tag: u8) -> HessianResult<NodeId> {
        self.enter()?;
        let (type_name, len) = match tag {
            0x55 => (Some(self.read_type()?), None),
            0x56 => {
                let type_name = self.read_type()?;
                (Some(type_name), Some(self.read_length()?))
            }
            0x57 => (None, None),
            0x58 => (None, Some(self.read_length()?)),
            0x70..=0x77 => (Some(self.read_type()?), Some((tag - 0x70) as usize)),
            _ => (None, Some((tag - 0x78) as usize)),
        };

        let id = self.placeholder(tree);
        let mut items = Vec::with_capacity(len.unwrap_or(0));
        match len {
            Some(len) => {
                for _ in 0..len {
                    items.push(self.read_node(tree)?);
                }
            }
            None => {
                while self.peek()? != b'Z' {
                    items.push(self.read_node(tree)?);
                }
                self.pos += 1;
            }
        }

        tree.replace(id, Value::List { type_name, items });
        self.depth -= 1;
        Ok(id)
    }

    fn read_map(&mut self, tree: &mut ValueTree, tag: u8) -> HessianResult<NodeId> {
        self.enter()?;
        let type_name = if tag == b'M' {
            Some(self.read_type()?)
        } else {
            None
        };

        let id = self.placeholder(tree);
        let mut entries = Vec::new();
        while self.peek()? != b'Z' {
            let key = self.read_node(tree)?;
            let value = self.read_node(tree)?;
            entries.push((key, value));
        }
        self.pos += 1;

        tree.replace(id, Value::Map { type_name, entries });
        self.depth -= 1;
        Ok(id)
    }

    fn read_object(&mut self, tree: &mut ValueTree, tag: u8) -> HessianResult<NodeId> {
        self.enter()?;
        let index = if tag == b'O' {
            self.read_int()?
        } else {
            (tag - 0x60) as i32
        };
        let def = usize::try_from(index)
            .ok()
            .and_then(|i| self.classes.get(i).cloned())
            .ok_or(HessianError::InvalidReference {
                kind: "class",
                index: index as i64,
            })?;

        let id = self.placeholder(tree);
        let mut fields = Vec::with_capacity(def.field_names.len());
        for _ in 0..def.field_names.len() {
            fields.push(self.read_node(tree)?);
        }

        tree.replace(
            id,
            Value::Object {
                def: Some(def),
                fields,
            },
        );
        self.depth -= 1;
        Ok(id)
    }
}
