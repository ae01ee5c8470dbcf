//! Argument validation against a tool's input schema.
//!
//! Covers the subset of JSON Schema that tool descriptors use: a top-level
//! `object` with `properties`, `required` and optional
//! `additionalProperties: false`, and primitive `type` checks per property.

use serde_json::Value;

/// Check `input` against `schema`. The error message names the offending field.
pub fn validate(schema: &Value, input: &Value) -> Result<(), String> {
    match schema.get("type").and_then(Value::as_str) {
        None => Ok(()),
        Some("object") => validate_object(schema, input),
        Some(expected) => check_type(expected, input).map_err(|found| {
            format!("expected {expected}, got {found}")
        }),
    }
}

fn validate_object(schema: &Value, input: &Value) -> Result<(), String> {
    let Some(fields) = input.as_object() else {
        return Err(format!("arguments must be an object, got {}", type_name(input)));
    };
    let properties = schema.get("properties").and_then(Value::as_object);

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            match fields.get(key) {
                None | Some(Value::Null) => return Err(format!("missing required field '{key}'")),
                Some(_) => {}
            }
        }
    }

    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));
    for (key, value) in fields {
        let declared = properties.and_then(|p| p.get(key));
        match declared {
            Some(prop) => {
                if let Some(expected) = prop.get("type").and_then(Value::as_str) {
                    // Optional fields may be sent as explicit nulls.
                    if value.is_null() {
                        continue;
                    }
                    check_type(expected, value).map_err(|found| {
                        format!("field '{key}' must be {expected}, got {found}")
                    })?;
                }
            }
            None if closed => return Err(format!("unexpected field '{key}'")),
            None => {}
        }
    }
    Ok(())
}

fn check_type(expected: &str, value: &Value) -> Result<(), &'static str> {
    let ok = match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    };
    if ok { Ok(()) } else { Err(type_name(value)) }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
