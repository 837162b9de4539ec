//! Per-column byte encoding.
//!
//! Primitives use fixed-width big-endian encodings (IEEE-754 bits for
//! floating point, `0xFF`/`0x00` for booleans, the scalar value as `u32` for
//! chars). Strings are raw UTF-8. Everything else goes through a tagged
//! `bincode` encoding of [`Value`], which keeps nested structure and the
//! wrapper type of every element.
//!
//! Decoding is strict: a primitive column whose length differs from the
//! declared width is a decode error.

use crate::{FieldType, StorageError, Value};

/// Encode one non-null field value for its declared type.
pub fn encode_value(field_type: FieldType, value: &Value) -> Result<Vec<u8>, StorageError> {
    match (field_type, value) {
        (FieldType::Boolean, Value::Bool(b)) => Ok(vec![if *b { 0xFF } else { 0x00 }]),
        (FieldType::Byte, Value::Byte(n)) => Ok(n.to_be_bytes().to_vec()),
        (FieldType::Char, Value::Char(c)) => Ok(u32::from(*c).to_be_bytes().to_vec()),
        (FieldType::Short, Value::Short(n)) => Ok(n.to_be_bytes().to_vec()),
        (FieldType::Int, Value::Int(n)) => Ok(n.to_be_bytes().to_vec()),
        (FieldType::Long, Value::Long(n)) => Ok(n.to_be_bytes().to_vec()),
        (FieldType::Float, Value::Float(f)) => Ok(f.to_bits().to_be_bytes().to_vec()),
        (FieldType::Double, Value::Double(d)) => Ok(d.to_bits().to_be_bytes().to_vec()),
        (FieldType::String, Value::String(s)) => Ok(s.as_bytes().to_vec()),
        (FieldType::Object | FieldType::Collection(_) | FieldType::Map, value) => {
            encode_generic(value)
        }
        (field_type, value) => Err(StorageError::UnsupportedType(format!(
            "cannot encode {:?} as {:?}",
            value, field_type
        ))),
    }
}

/// Decode one column for its declared type, restoring the declared
/// container kind for collections.
pub fn decode_value(
    field_type: FieldType,
    column: &str,
    bytes: &[u8],
) -> Result<Value, StorageError> {
    match field_type {
        FieldType::Boolean => {
            let [b] = fixed::<1>(column, bytes)?;
            Ok(Value::Bool(b != 0))
        }
        FieldType::Byte => Ok(Value::Byte(i8::from_be_bytes(fixed(column, bytes)?))),
        FieldType::Char => {
            let scalar = u32::from_be_bytes(fixed(column, bytes)?);
            char::from_u32(scalar).map(Value::Char).ok_or_else(|| {
                StorageError::decode(column, format!("invalid char scalar {:#x}", scalar))
            })
        }
        FieldType::Short => Ok(Value::Short(i16::from_be_bytes(fixed(column, bytes)?))),
        FieldType::Int => Ok(Value::Int(i32::from_be_bytes(fixed(column, bytes)?))),
        FieldType::Long => Ok(Value::Long(i64::from_be_bytes(fixed(column, bytes)?))),
        FieldType::Float => Ok(Value::Float(f32::from_bits(u32::from_be_bytes(fixed(
            column, bytes,
        )?)))),
        FieldType::Double => Ok(Value::Double(f64::from_bits(u64::from_be_bytes(fixed(
            column, bytes,
        )?)))),
        FieldType::String => String::from_utf8(bytes.to_vec())
            .map(Value::String)
            .map_err(|e| StorageError::decode(column, e)),
        FieldType::Object | FieldType::Collection(_) | FieldType::Map => {
            let value = decode_generic(column, bytes)?;
            Ok(restore_container(field_type, value))
        }
    }
}

/// Tagged encoding used for objects, containers and relation identifiers.
///
/// Live object references never reach a column; relation fields must be
/// resolved to identifiers first.
pub fn encode_generic(value: &Value) -> Result<Vec<u8>, StorageError> {
    if contains_object(value) {
        return Err(StorageError::UnsupportedType(
            "unresolved object reference cannot be stored".to_string(),
        ));
    }
    bincode::serialize(value)
        .map_err(|e| StorageError::UnsupportedType(format!("cannot encode value: {}", e)))
}

pub fn decode_generic(column: &str, bytes: &[u8]) -> Result<Value, StorageError> {
    bincode::deserialize(bytes).map_err(|e| StorageError::decode(column, e))
}

/// Rebuild containers with the declared kind; map entries come back in key
/// order.
pub fn restore_container(field_type: FieldType, value: Value) -> Value {
    match (field_type, value) {
        (FieldType::Collection(kind), Value::Collection(_, items)) => {
            Value::Collection(kind, kind.normalize(items))
        }
        (FieldType::Map, Value::Map(entries)) => Value::sorted_map(entries),
        (_, value) => value,
    }
}

fn contains_object(value: &Value) -> bool {
    match value {
        Value::Object(_) => true,
        Value::Collection(_, items) => items.iter().any(contains_object),
        Value::Map(entries) => entries
            .iter()
            .any(|(k, v)| contains_object(k) || contains_object(v)),
        _ => false,
    }
}

fn fixed<const N: usize>(column: &str, bytes: &[u8]) -> Result<[u8; N], StorageError> {
    <[u8; N]>::try_from(bytes).map_err(|_| {
        StorageError::decode(
            column,
            format!("expected {} bytes, found {}", N, bytes.len()),
        )
    })
}
