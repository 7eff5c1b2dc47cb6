//! Decoded message values.

use bgmesh_frame::{MessageKind, Opcode};
use bytes::Bytes;
use data_encoding::HEXLOWER;
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};

use crate::descriptor::{Element, FieldType, Tail};
use crate::error::{RegistryError, Result};

/// A single decoded field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    /// Fixed-width opaque block.
    Fixed(Bytes),
    /// Raw trailing array.
    Bytes(Bytes),
    /// Trailing array of integers, in wire order.
    Elements(Vec<u32>),
}

impl Value {
    /// Unsigned view of an integer value.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::U8(v) => Some(v.into()),
            Value::U16(v) => Some(v.into()),
            Value::U32(v) => Some(v.into()),
            Value::I8(v) => u64::try_from(v).ok(),
            Value::I16(v) => u64::try_from(v).ok(),
            Value::I32(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }

    /// Byte view of a fixed block or raw array.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Fixed(b) | Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Element view of an integer array.
    pub fn as_elements(&self) -> Option<&[u32]> {
        match self {
            Value::Elements(items) => Some(items),
            _ => None,
        }
    }

    /// Convert a JSON value into a field value of type `ty`.
    pub fn from_json_field(ty: FieldType, json: &serde_json::Value) -> std::result::Result<Self, String> {
        match ty {
            FieldType::U8 => int_from_json(json).map(Value::U8),
            FieldType::I8 => int_from_json(json).map(Value::I8),
            FieldType::U16 => int_from_json(json).map(Value::U16),
            FieldType::I16 => int_from_json(json).map(Value::I16),
            FieldType::U32 => int_from_json(json).map(Value::U32),
            FieldType::I32 => int_from_json(json).map(Value::I32),
            FieldType::Fixed(width) => {
                let bytes = hex_from_json(json)?;
                if bytes.len() != width {
                    return Err(format!("expected {width} bytes, got {}", bytes.len()));
                }
                Ok(Value::Fixed(bytes))
            }
        }
    }

    /// Convert a JSON value into the value of a trailing array.
    ///
    /// Raw arrays take a hex string; integer arrays take a JSON array.
    pub fn from_json_tail(tail: &Tail, json: &serde_json::Value) -> std::result::Result<Self, String> {
        match tail.element {
            Element::Byte => hex_from_json(json).map(Value::Bytes),
            Element::Uint(size) => {
                let items = json.as_array().ok_or("expected an array of integers")?;
                let max = if size >= 4 { u64::from(u32::MAX) } else { (1u64 << (size * 8)) - 1 };
                items
                    .iter()
                    .map(|item| match item.as_u64() {
                        Some(v) if v <= max => Ok(v as u32),
                        _ => Err(format!("element {item} does not fit {size} bytes")),
                    })
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map(Value::Elements)
            }
        }
    }
}

fn int_from_json<T: TryFrom<i64>>(json: &serde_json::Value) -> std::result::Result<T, String> {
    let raw = json
        .as_i64()
        .or_else(|| json.as_bool().map(i64::from))
        .ok_or_else(|| format!("expected an integer, got {json}"))?;
    T::try_from(raw).map_err(|_| format!("{raw} is out of range"))
}

fn hex_from_json(json: &serde_json::Value) -> std::result::Result<Bytes, String> {
    let text = json.as_str().ok_or("expected a hex string")?;
    HEXLOWER
        .decode(text.to_ascii_lowercase().as_bytes())
        .map(Bytes::from)
        .map_err(|err| format!("invalid hex: {err}"))
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::U8(v) => serializer.serialize_u8(*v),
            Value::I8(v) => serializer.serialize_i8(*v),
            Value::U16(v) => serializer.serialize_u16(*v),
            Value::I16(v) => serializer.serialize_i16(*v),
            Value::U32(v) => serializer.serialize_u32(*v),
            Value::I32(v) => serializer.serialize_i32(*v),
            Value::Fixed(b) | Value::Bytes(b) => serializer.serialize_str(&HEXLOWER.encode(b)),
            Value::Elements(items) => items.serialize(serializer),
        }
    }
}

/// A decoded message: identity plus named values in layout order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub kind: MessageKind,
    pub opcode: Opcode,
    pub name: String,
    pub fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new(kind: MessageKind, opcode: Opcode, name: impl Into<String>) -> Self {
        Self {
            kind,
            opcode,
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Append a field (builder style).
    pub fn with(mut self, field: impl Into<String>, value: Value) -> Self {
        self.fields.push((field.into(), value));
        self
    }

    /// Look up a value by field name.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// Integer field widened to u64.
    pub fn uint(&self, field: &str) -> Result<u64> {
        self.get(field)
            .ok_or_else(|| self.field_error(field, "missing"))?
            .as_u64()
            .ok_or_else(|| self.field_error(field, "not an unsigned integer"))
    }

    pub fn u16(&self, field: &str) -> Result<u16> {
        match self.get(field) {
            Some(Value::U16(v)) => Ok(*v),
            Some(_) => Err(self.field_error(field, "not a u16")),
            None => Err(self.field_error(field, "missing")),
        }
    }

    pub fn u32(&self, field: &str) -> Result<u32> {
        match self.get(field) {
            Some(Value::U32(v)) => Ok(*v),
            Some(_) => Err(self.field_error(field, "not a u32")),
            None => Err(self.field_error(field, "missing")),
        }
    }

    /// Byte view of a fixed block or raw array field.
    pub fn bytes(&self, field: &str) -> Result<&Bytes> {
        self.get(field)
            .ok_or_else(|| self.field_error(field, "missing"))?
            .as_bytes()
            .ok_or_else(|| self.field_error(field, "not a byte array"))
    }

    fn field_error(&self, field: &str, reason: &str) -> RegistryError {
        RegistryError::Field {
            name: self.name.clone(),
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}

struct Fields<'a>(&'a [(String, Value)]);

impl Serialize for Fields<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Record", 4)?;
        s.serialize_field("name", &self.name)?;
        s.serialize_field("kind", self.kind.as_str())?;
        s.serialize_field("opcode", &self.opcode.to_string())?;
        s.serialize_field("fields", &Fields(&self.fields))?;
        s.end()
    }
}
