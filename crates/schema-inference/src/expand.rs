//! Minimal schema relaxation.
//!
//! Given a schema, the payload it rejected, and the violations the validator
//! reported, mutate the schema in place so the payload is accepted while every
//! constraint the payload does not contradict stays intact.

use serde_json::{Map, Value, json};

use crate::classify::ValueKind;
use crate::errors::{InferenceError, InferenceResult};
use crate::synth::synth_value;
use crate::validate::{Violation, ViolationKind};

/// Apply every violation's expansion rule to `schema`. Reapplying the same
/// inputs leaves the schema unchanged.
pub fn expand_schema(
    schema: &mut Value,
    payload: &Value,
    violations: &[Violation],
) -> InferenceResult<()> {
    for violation in violations {
        match &violation.kind {
            ViolationKind::AdditionalProperty => add_property(schema, payload, violation)?,
            ViolationKind::InvalidType => widen_type(schema, payload, violation)?,
            ViolationKind::Required => drop_required(schema, violation)?,
            ViolationKind::ArrayMinItems => set_array_bound(schema, payload, violation, "minItems")?,
            ViolationKind::ArrayMaxItems => set_array_bound(schema, payload, violation, "maxItems")?,
            ViolationKind::UniqueItems => remove_keyword(schema, violation, "uniqueItems")?,
            ViolationKind::Contains => remove_keyword(schema, violation, "contains")?,
            ViolationKind::StringMinLength => {
                set_string_bound(schema, payload, violation, "minLength")?
            }
            ViolationKind::StringMaxLength => {
                set_string_bound(schema, payload, violation, "maxLength")?
            }
            ViolationKind::Pattern => remove_keyword(schema, violation, "pattern")?,
            ViolationKind::MultipleOf => remove_keyword(schema, violation, "multipleOf")?,
            ViolationKind::NumberMinimum => {
                set_number_bound(schema, payload, violation, "minimum", Epsilon::None)?
            }
            ViolationKind::NumberMaximum => {
                set_number_bound(schema, payload, violation, "maximum", Epsilon::None)?
            }
            ViolationKind::NumberExclusiveMinimum => set_number_bound(
                schema,
                payload,
                violation,
                "exclusiveMinimum",
                Epsilon::Below,
            )?,
            ViolationKind::NumberExclusiveMaximum => set_number_bound(
                schema,
                payload,
                violation,
                "exclusiveMaximum",
                Epsilon::Above,
            )?,
            ViolationKind::Unsupported(label) => {
                return Err(InferenceError::NotImplemented((*label).to_owned()));
            }
            ViolationKind::Unknown(label) => {
                return Err(InferenceError::UnknownViolation(label.clone()));
            }
        }
    }
    Ok(())
}

/// Walk `schema` down to the sub-schema addressed by the violation path:
/// integer segments descend through `items`, everything else through
/// `properties`. A missing `properties` map along the way is allocated empty.
fn subschema_mut<'a>(schema: &'a mut Value, path: &[String]) -> InferenceResult<&'a mut Value> {
    let mut current = schema;
    for segment in path {
        if segment.parse::<usize>().is_ok() {
            current = current
                .get_mut("items")
                .ok_or_else(|| InferenceError::shape(path, "no items schema for array segment"))?;
        } else {
            let fields = current
                .as_object_mut()
                .ok_or_else(|| InferenceError::shape(path, "sub-schema is not an object"))?;
            if !fields.contains_key("properties") {
                fields.insert("properties".to_owned(), Value::Object(Map::new()));
            }
            current = fields
                .get_mut("properties")
                .and_then(|properties| properties.get_mut(segment))
                .ok_or_else(|| {
                    InferenceError::shape(path, format!("no property schema for '{segment}'"))
                })?;
        }
    }
    Ok(current)
}

/// Fetch the payload value at the violation path.
fn payload_at<'a>(payload: &'a Value, path: &[String]) -> InferenceResult<&'a Value> {
    if path.is_empty() {
        return Ok(payload);
    }
    let pointer: String = path
        .iter()
        .map(|seg| format!("/{}", seg.replace('~', "~0").replace('/', "~1")))
        .collect();
    payload
        .pointer(&pointer)
        .ok_or_else(|| InferenceError::shape(path, "payload has no value at violation path"))
}

fn named_property(violation: &Violation) -> InferenceResult<&str> {
    violation
        .property
        .as_deref()
        .ok_or_else(|| InferenceError::shape(&violation.path, "violation names no property"))
}

fn given_type(violation: &Violation) -> InferenceResult<&str> {
    violation
        .given
        .as_deref()
        .ok_or_else(|| InferenceError::shape(&violation.path, "violation carries no given type"))
}

/// Admit an unknown property: synthesize its schema from the payload and add
/// it to `properties`. It is not added to `required`.
fn add_property(schema: &mut Value, payload: &Value, violation: &Violation) -> InferenceResult<()> {
    let property = named_property(violation)?.to_owned();
    let value = payload_at(payload, &violation.path)?
        .get(&property)
        .ok_or_else(|| InferenceError::shape(&violation.path, "payload misses named property"))?;
    let property_schema = synth_value(value)?;

    let target = subschema_mut(schema, &violation.path)?;
    let fields = target
        .as_object_mut()
        .ok_or_else(|| InferenceError::shape(&violation.path, "target is not an object schema"))?;
    let properties = fields
        .entry("properties")
        .or_insert_with(|| Value::Object(Map::new()));
    let properties = properties
        .as_object_mut()
        .ok_or_else(|| InferenceError::shape(&violation.path, "properties is not a map"))?;
    properties.insert(property, property_schema);
    Ok(())
}

/// Widen a `type` constraint so it admits the payload's type as well.
///
/// At an array element (numeric path tip) the array's `items` becomes, or
/// grows, an `anyOf` union. Elsewhere the site's `type` becomes the sorted
/// union of its previous value and the payload's type; object and array
/// payloads additionally get their structure synthesized and merged in.
fn widen_type(schema: &mut Value, payload: &Value, violation: &Violation) -> InferenceResult<()> {
    let given = given_type(violation)?.to_owned();

    let at_array_element = violation
        .path
        .last()
        .is_some_and(|seg| seg.parse::<usize>().is_ok());
    if at_array_element {
        let parent_path = &violation.path[..violation.path.len() - 1];
        let array = subschema_mut(schema, parent_path)?;
        let items = array
            .get_mut("items")
            .ok_or_else(|| InferenceError::shape(parent_path, "no items schema to widen"))?;

        if let Some(Value::Array(branches)) = items.get_mut("anyOf") {
            branches.push(json!({"type": given}));
            canonicalize_any_of(branches);
        } else {
            let mut branches = Vec::new();
            match items.get("type") {
                Some(Value::String(prev)) => branches.push(json!({"type": prev})),
                Some(Value::Array(prev_types)) => {
                    for prev in prev_types {
                        branches.push(json!({"type": prev}));
                    }
                }
                _ => {}
            }
            branches.push(json!({"type": given}));
            canonicalize_any_of(&mut branches);
            *items = json!({"anyOf": branches});
        }
        return Ok(());
    }

    let union = {
        let target = subschema_mut(schema, &violation.path)?;
        let mut types: Vec<String> = match target.get("type") {
            Some(Value::String(t)) => vec![t.clone()],
            Some(Value::Array(types)) => types
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect(),
            _ => Vec::new(),
        };
        types.push(given.clone());
        types.sort();
        types.dedup();
        types
    };

    if given == "object" || given == "array" {
        let value = payload_at(payload, &violation.path)?;
        let synthesized = synth_value(value)?;
        let target = subschema_mut(schema, &violation.path)?;
        if let (Some(fields), Value::Object(new_fields)) = (target.as_object_mut(), synthesized) {
            for (key, value) in new_fields {
                fields.insert(key, value);
            }
        }
    }

    let target = subschema_mut(schema, &violation.path)?;
    target["type"] = json!(union);
    Ok(())
}

/// Stop requiring a property the payload omitted. Absence is a no-op.
fn drop_required(schema: &mut Value, violation: &Violation) -> InferenceResult<()> {
    let property = named_property(violation)?.to_owned();
    let target = subschema_mut(schema, &violation.path)?;
    if let Some(Value::Array(required)) = target.get_mut("required") {
        required.retain(|entry| entry.as_str() != Some(property.as_str()));
    }
    Ok(())
}

fn set_array_bound(
    schema: &mut Value,
    payload: &Value,
    violation: &Violation,
    keyword: &str,
) -> InferenceResult<()> {
    let length = payload_at(payload, &violation.path)?
        .as_array()
        .map(Vec::len)
        .ok_or_else(|| InferenceError::shape(&violation.path, "payload value is not an array"))?;
    let target = subschema_mut(schema, &violation.path)?;
    target[keyword] = json!(length);
    Ok(())
}

fn set_string_bound(
    schema: &mut Value,
    payload: &Value,
    violation: &Violation,
    keyword: &str,
) -> InferenceResult<()> {
    let length = payload_at(payload, &violation.path)?
        .as_str()
        .map(|s| s.chars().count())
        .ok_or_else(|| InferenceError::shape(&violation.path, "payload value is not a string"))?;
    let target = subschema_mut(schema, &violation.path)?;
    target[keyword] = json!(length);
    Ok(())
}

enum Epsilon {
    None,
    Below,
    Above,
}

/// Move a numeric bound to admit the payload value. Exclusive bounds step past
/// the value by a fixed epsilon: 1 for integers, 0.0001 for floats.
fn set_number_bound(
    schema: &mut Value,
    payload: &Value,
    violation: &Violation,
    keyword: &str,
    epsilon: Epsilon,
) -> InferenceResult<()> {
    let number = payload_at(payload, &violation.path)?
        .as_number()
        .cloned()
        .ok_or_else(|| InferenceError::shape(&violation.path, "payload value is not a number"))?;

    let bound = match epsilon {
        Epsilon::None => Value::Number(number),
        Epsilon::Below => match number.as_i64() {
            Some(n) => json!(n - 1),
            None => json!(number.as_f64().unwrap_or(0.0) - 1e-4),
        },
        Epsilon::Above => match number.as_i64() {
            Some(n) => json!(n + 1),
            None => json!(number.as_f64().unwrap_or(0.0) + 1e-4),
        },
    };

    let target = subschema_mut(schema, &violation.path)?;
    target[keyword] = bound;
    Ok(())
}

fn remove_keyword(schema: &mut Value, violation: &Violation, keyword: &str) -> InferenceResult<()> {
    let target = subschema_mut(schema, &violation.path)?;
    if let Some(fields) = target.as_object_mut() {
        fields.remove(keyword);
    }
    Ok(())
}

/// Sort `anyOf` branches by their `type` and drop duplicates so repeated
/// widening converges on one stable form.
fn canonicalize_any_of(branches: &mut Vec<Value>) {
    branches.sort_by(|a, b| {
        let a = a.get("type").and_then(Value::as_str).unwrap_or_default();
        let b = b.get("type").and_then(Value::as_str).unwrap_or_default();
        a.cmp(b)
    });
    branches.dedup();
}
