//! Descriptor-driven payload codec.
//!
//! Fixed fields are read in order, little endian. An optional trailing
//! array follows, preceded by a byte count.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::descriptor::{Element, FieldType, LengthPrefix, PayloadDescriptor};
use crate::error::{RegistryError, Result};
use crate::value::Value;

/// Decode `payload` into named values following `desc`.
///
/// With `strict_length`, bytes after the described layout are a mismatch.
pub fn decode_payload(
    name: &str,
    desc: &PayloadDescriptor,
    payload: &[u8],
    strict_length: bool,
) -> Result<Vec<(String, Value)>> {
    let mismatch = |reason: String| RegistryError::PayloadMismatch {
        name: name.to_string(),
        reason,
    };

    if payload.len() < desc.min_len() {
        return Err(mismatch(format!(
            "{} bytes, layout needs at least {}",
            payload.len(),
            desc.min_len()
        )));
    }

    let mut buf = payload;
    let mut values = Vec::with_capacity(desc.fields.len() + 1);
    for field in &desc.fields {
        let value = match field.ty {
            FieldType::U8 => Value::U8(buf.get_u8()),
            FieldType::I8 => Value::I8(buf.get_i8()),
            FieldType::U16 => Value::U16(buf.get_u16_le()),
            FieldType::I16 => Value::I16(buf.get_i16_le()),
            FieldType::U32 => Value::U32(buf.get_u32_le()),
            FieldType::I32 => Value::I32(buf.get_i32_le()),
            FieldType::Fixed(width) => {
                let block = Bytes::copy_from_slice(&buf[..width]);
                buf.advance(width);
                Value::Fixed(block)
            }
        };
        values.push((field.name.clone(), value));
    }

    if let Some(tail) = &desc.tail {
        let count = match tail.prefix {
            LengthPrefix::U8 => usize::from(buf.get_u8()),
            LengthPrefix::U16 => usize::from(buf.get_u16_le()),
        };
        if buf.len() < count {
            return Err(mismatch(format!(
                "'{}' declares {count} bytes, {} remain",
                tail.name,
                buf.len()
            )));
        }
        let value = match tail.element {
            Element::Byte => Value::Bytes(Bytes::copy_from_slice(&buf[..count])),
            Element::Uint(size) => {
                if count % size != 0 {
                    return Err(mismatch(format!(
                        "'{}' byte count {count} is not a multiple of {size}",
                        tail.name
                    )));
                }
                Value::Elements(
                    buf[..count]
                        .chunks_exact(size)
                        .map(|chunk| {
                            chunk
                                .iter()
                                .rev()
                                .fold(0u32, |acc, b| (acc << 8) | u32::from(*b))
                        })
                        .collect(),
                )
            }
        };
        buf.advance(count);
        values.push((tail.name.clone(), value));
    }

    if strict_length && !buf.is_empty() {
        return Err(mismatch(format!("{} trailing bytes", buf.len())));
    }
    Ok(values)
}

/// Encode named values following `desc`.
///
/// Every described field must be present with a matching type; extra
/// values are rejected so typos surface instead of vanishing.
pub fn encode_payload(
    name: &str,
    desc: &PayloadDescriptor,
    values: &[(String, Value)],
) -> Result<Bytes> {
    let field_err = |field: &str, reason: String| RegistryError::Field {
        name: name.to_string(),
        field: field.to_string(),
        reason,
    };
    let lookup = |field: &str| {
        values
            .iter()
            .find(|(n, _)| n == field)
            .map(|(_, v)| v)
            .ok_or_else(|| field_err(field, "missing".to_string()))
    };

    for (given, _) in values {
        let known = desc.field(given).is_some()
            || desc.tail.as_ref().is_some_and(|t| &t.name == given);
        if !known {
            return Err(field_err(given, "not part of the layout".to_string()));
        }
    }

    let mut out = BytesMut::with_capacity(desc.min_len());
    for field in &desc.fields {
        let value = lookup(&field.name)?;
        match (field.ty, value) {
            (FieldType::U8, Value::U8(v)) => out.put_u8(*v),
            (FieldType::I8, Value::I8(v)) => out.put_i8(*v),
            (FieldType::U16, Value::U16(v)) => out.put_u16_le(*v),
            (FieldType::I16, Value::I16(v)) => out.put_i16_le(*v),
            (FieldType::U32, Value::U32(v)) => out.put_u32_le(*v),
            (FieldType::I32, Value::I32(v)) => out.put_i32_le(*v),
            (FieldType::Fixed(width), Value::Fixed(b)) if b.len() == width => out.put_slice(b),
            (ty, other) => {
                return Err(field_err(
                    &field.name,
                    format!("expected {ty:?}, got {other:?}"),
                ))
            }
        }
    }

    if let Some(tail) = &desc.tail {
        let mut body = BytesMut::new();
        match (tail.element, lookup(&tail.name)?) {
            (Element::Byte, Value::Bytes(b)) => body.put_slice(b),
            (Element::Uint(size), Value::Elements(items)) => {
                for item in items {
                    let le = item.to_le_bytes();
                    if le[size..].iter().any(|b| *b != 0) {
                        return Err(field_err(
                            &tail.name,
                            format!("element {item} does not fit {size} bytes"),
                        ));
                    }
                    body.put_slice(&le[..size]);
                }
            }
            (_, other) => {
                return Err(field_err(
                    &tail.name,
                    format!("unexpected value {other:?}"),
                ))
            }
        }
        if body.len() > tail.prefix.max_len() {
            return Err(field_err(
                &tail.name,
                format!("{} bytes exceed the prefix limit {}", body.len(), tail.prefix.max_len()),
            ));
        }
        match tail.prefix {
            LengthPrefix::U8 => out.put_u8(body.len() as u8),
            LengthPrefix::U16 => out.put_u16_le(body.len() as u16),
        }
        out.put_slice(&body);
    }

    Ok(out.freeze())
}
