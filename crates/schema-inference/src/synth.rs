//! Fresh schema synthesis from payloads.

use std::collections::BTreeSet;

use serde_json::{Map, Value, json};

use crate::classify::ValueKind;
use crate::errors::{InferenceError, InferenceResult};
use crate::{SCHEMA_ID, SCHEMA_URI};

/// Schema for an array payload.
///
/// An empty array constrains nothing beyond `type`. A uniform array takes its
/// `items` schema from the first element; a mixed array of scalars becomes an
/// `anyOf` over the sorted unique element types. Mixed arrays that contain
/// nested objects or arrays are rejected.
pub fn array_schema(elements: &[Value]) -> InferenceResult<Value> {
    let mut schema = json!({"type": "array"});
    let Some(first) = elements.first() else {
        return Ok(schema);
    };

    let kinds: BTreeSet<ValueKind> = elements.iter().map(ValueKind::of).collect();
    if kinds.len() == 1 {
        schema["items"] = synth_value(first)?;
        return Ok(schema);
    }

    if kinds.contains(&ValueKind::Object) || kinds.contains(&ValueKind::Array) {
        return Err(InferenceError::MixedNestedTypes);
    }

    let branches: Vec<Value> = kinds
        .iter()
        .map(|kind| json!({"type": kind.as_str()}))
        .collect();
    schema["items"] = json!({"anyOf": branches});
    Ok(schema)
}

/// Schema for an object payload: every present key becomes a property and is
/// required. The `required` list is sorted lexicographically.
pub fn object_schema(fields: &Map<String, Value>) -> InferenceResult<Value> {
    let mut properties = Map::new();
    for (key, value) in fields {
        properties.insert(key.clone(), synth_value(value)?);
    }

    let mut required: Vec<&String> = fields.keys().collect();
    required.sort();

    Ok(json!({
        "type": "object",
        "properties": properties,
        "required": required,
    }))
}

/// Schema for any payload value.
pub fn synth_value(value: &Value) -> InferenceResult<Value> {
    match value {
        Value::Object(fields) => object_schema(fields),
        Value::Array(elements) => array_schema(elements),
        other => Ok(json!({"type": ValueKind::of(other).as_str()})),
    }
}

/// Top-level synthesis entry: wraps the synthesized body with the draft URI,
/// `$id`, resource title, and `additionalProperties: false`.
pub fn create_schema(payload: &Value, resource_name: &str) -> InferenceResult<Value> {
    let mut schema = Map::new();
    schema.insert("$schema".to_owned(), json!(SCHEMA_URI));
    schema.insert("$id".to_owned(), json!(SCHEMA_ID));
    schema.insert("title".to_owned(), json!(resource_name));
    schema.insert("additionalProperties".to_owned(), json!(false));

    let body = synth_value(payload)?;
    if let Value::Object(body) = body {
        for (key, value) in body {
            schema.insert(key, value);
        }
    }
    Ok(Value::Object(schema))
}
