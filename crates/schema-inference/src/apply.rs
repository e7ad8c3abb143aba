//! Orchestration of the learn path: synthesize, accept, or expand.

use metrics::{counter, histogram};
use serde_json::Value;
use tracing::debug;

use crate::errors::InferenceResult;
use crate::expand::expand_schema;
use crate::synth::create_schema;
use crate::validate::validate;

/// Decide how a payload reshapes a resource's schema.
///
/// An empty (or null) schema yields a freshly synthesized one. A schema that
/// already accepts the payload yields `None`. Otherwise a copy of the schema
/// is expanded to admit the payload and returned; the caller's value is never
/// mutated.
pub fn apply_payload(
    old_schema: &Value,
    payload: &Value,
    resource_name: &str,
) -> InferenceResult<Option<Value>> {
    let start = std::time::Instant::now();
    let result = apply_inner(old_schema, payload, resource_name);
    histogram!("haven_inference_seconds").record(start.elapsed().as_secs_f64());
    result
}

fn apply_inner(
    old_schema: &Value,
    payload: &Value,
    resource_name: &str,
) -> InferenceResult<Option<Value>> {
    counter!("haven_payloads_observed_total", "resource" => resource_name.to_owned()).increment(1);

    let empty = match old_schema {
        Value::Null => true,
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    };
    if empty {
        debug!(resource = resource_name, "no existing schema, synthesizing");
        counter!("haven_schemas_synthesized_total").increment(1);
        return create_schema(payload, resource_name).map(Some);
    }

    let validation = validate(old_schema, payload)?;
    if validation.valid {
        return Ok(None);
    }

    debug!(
        resource = resource_name,
        violations = validation.violations.len(),
        "schema rejected payload, expanding"
    );
    let mut schema = old_schema.clone();
    expand_schema(&mut schema, payload, &validation.violations)?;
    counter!("haven_schema_expansions_total", "resource" => resource_name.to_owned()).increment(1);
    Ok(Some(schema))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_schema_synthesizes() {
        let got = apply_payload(&json!({}), &json!({"a": 1}), "t")
            .unwrap()
            .unwrap();
        assert_eq!(got["title"], json!("t"));
        assert_eq!(got["properties"]["a"], json!({"type": "number"}));
    }

    #[test]
    fn null_schema_synthesizes() {
        let got = apply_payload(&Value::Null, &json!({"a": 1}), "t").unwrap();
        assert!(got.is_some());
    }

    #[test]
    fn accepting_schema_returns_none() {
        let schema = create_schema(&json!({"a": 1}), "t").unwrap();
        let got = apply_payload(&schema, &json!({"a": 2}), "t").unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn rejecting_schema_is_expanded_without_mutating_the_input() {
        let schema = create_schema(&json!({"a": 1}), "t").unwrap();
        let before = schema.clone();
        let got = apply_payload(&schema, &json!({"a": "one"}), "t")
            .unwrap()
            .unwrap();
        assert_eq!(schema, before);
        assert_eq!(
            got["properties"]["a"],
            json!({"type": ["number", "string"]})
        );
    }

    #[test]
    fn applying_twice_reaches_a_fixpoint() {
        let schema = create_schema(&json!({"a": 1, "b": "x"}), "t").unwrap();
        let payload = json!({"a": "one", "c": true});

        let expanded = apply_payload(&schema, &payload, "t").unwrap().unwrap();
        let again = apply_payload(&expanded, &payload, "t").unwrap();
        assert!(again.is_none(), "second application must be a no-op");
    }
}
