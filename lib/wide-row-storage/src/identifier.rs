//! Row keys derived from primary-key values.

use crate::codec::encode_generic;
use crate::{FieldType, StorageError, TypeDescriptor, Value};

/// Compute the row key for `key` as the primary key of `descriptor`.
///
/// String keys are their UTF-8 bytes, `Long` keys their 8-byte big-endian
/// form, and any other declared type the generic tagged encoding.
pub fn row_identifier(descriptor: &TypeDescriptor, key: &Value) -> Result<Vec<u8>, StorageError> {
    let field = descriptor.primary_key()?;
    match (field.field_type, key) {
        (_, Value::Null) => Err(StorageError::Usage(format!(
            "Primary key {}.{} has no value",
            descriptor.name, field.name
        ))),
        (FieldType::String, Value::String(s)) => Ok(s.as_bytes().to_vec()),
        (FieldType::Long, Value::Long(n)) => Ok(n.to_be_bytes().to_vec()),
        (FieldType::String | FieldType::Long, other) => Err(StorageError::UnsupportedType(
            format!(
                "primary key {}.{} declared {:?} but holds {:?}",
                descriptor.name, field.name, field.field_type, other
            ),
        )),
        (_, other) => encode_generic(other),
    }
}

/// Printable form of a row key for error messages.
pub fn display_identifier(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Long(n) => n.to_string(),
        other => format!("{:?}", other),
    }
}
