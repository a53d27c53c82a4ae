//! Convenience helpers for working with JSON scalars carried in field content.

use serde_json::Value;

use crate::runtime::metadata::FieldType;

/// Render a scalar the way it reads in text: strings unquoted, booleans
/// lowercase, numbers in their JSON form.
pub fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Coerce a value to its declared type. Only `string` is enforced; every
/// other type passes through as received.
pub fn coerce(value: &Value, field_type: Option<&FieldType>) -> Value {
    match (field_type, value) {
        (Some(FieldType::String), Value::String(_)) => value.clone(),
        (Some(FieldType::String), other) => Value::String(scalar_text(other)),
        _ => value.clone(),
    }
}
