//! Draft 2020-12 validation, adapted to a closed violation vocabulary.
//!
//! The `jsonschema` crate stays confined to this module: its errors are
//! converted into [`Violation`]s carrying a [`ViolationKind`] tag and an
//! instance JSON-pointer, which is everything the expander dispatches on.

use jsonschema::error::ValidationErrorKind;
use jsonschema::{Draft, ValidationError};
use serde_json::Value;

use crate::classify::ValueKind;
use crate::errors::{InferenceError, InferenceResult};

/// Outcome of validating a payload against a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Validation {
    pub valid: bool,
    pub violations: Vec<Violation>,
}

/// One schema violation.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub kind: ViolationKind,
    /// Location of the failing value as JSON-pointer segments; empty at the
    /// document root. Segments whose text parses as an integer address array
    /// elements.
    pub path: Vec<String>,
    pub description: String,
    /// Name of the failing field, `(root)` at the document root.
    pub field: String,
    /// Property named by additional-property and required violations.
    pub property: Option<String>,
    /// Type(s) the schema expected at the failing location.
    pub expected: Option<String>,
    /// Type the payload actually carried there.
    pub given: Option<String>,
}

/// Closed vocabulary of violation kinds the expander understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationKind {
    AdditionalProperty,
    InvalidType,
    Required,
    ArrayMinItems,
    ArrayMaxItems,
    UniqueItems,
    Contains,
    StringMinLength,
    StringMaxLength,
    Pattern,
    MultipleOf,
    NumberMinimum,
    NumberMaximum,
    NumberExclusiveMinimum,
    NumberExclusiveMaximum,
    /// Recognized but deliberately unhandled; expansion fails loudly.
    Unsupported(&'static str),
    /// Outside the vocabulary entirely; expansion fails loudly.
    Unknown(String),
}

impl ViolationKind {
    /// Wire label for the violation, as exposed by the validation endpoint.
    pub fn as_str(&self) -> &str {
        match self {
            Self::AdditionalProperty => "additional_property_not_allowed",
            Self::InvalidType => "invalid_type",
            Self::Required => "required",
            Self::ArrayMinItems => "array_min_items",
            Self::ArrayMaxItems => "array_max_items",
            Self::UniqueItems => "unique",
            Self::Contains => "contains",
            Self::StringMinLength => "string_gte",
            Self::StringMaxLength => "string_lte",
            Self::Pattern => "pattern",
            Self::MultipleOf => "multiple_of",
            Self::NumberMinimum => "number_gte",
            Self::NumberMaximum => "number_lte",
            Self::NumberExclusiveMinimum => "number_gt",
            Self::NumberExclusiveMaximum => "number_lt",
            Self::Unsupported(label) => label,
            Self::Unknown(label) => label,
        }
    }
}

/// Compile-check a schema without validating anything against it.
pub fn check_schema(schema: &Value) -> InferenceResult<()> {
    build_validator(schema).map(|_| ())
}

/// Validate `payload` against `schema`, returning every violation found.
pub fn validate(schema: &Value, payload: &Value) -> InferenceResult<Validation> {
    let validator = build_validator(schema)?;
    let mut violations = Vec::new();
    for error in validator.iter_errors(payload) {
        push_violations(&mut violations, schema, error);
    }
    Ok(Validation {
        valid: violations.is_empty(),
        violations,
    })
}

fn build_validator(schema: &Value) -> InferenceResult<jsonschema::Validator> {
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .map_err(|e| InferenceError::InvalidSchema(e.to_string()))
}

/// Split a JSON pointer ("/a/0/b") into unescaped segments.
fn pointer_segments(pointer: &str) -> Vec<String> {
    if pointer.is_empty() {
        return Vec::new();
    }
    pointer
        .split('/')
        .skip(1)
        .map(|seg| seg.replace("~1", "/").replace("~0", "~"))
        .collect()
}

fn is_index(segment: &str) -> bool {
    segment.parse::<usize>().is_ok()
}

/// Read the `type` keyword of the sub-schema addressed by `path`.
fn schema_types_at(schema: &Value, path: &[String]) -> Option<String> {
    let mut current = schema;
    for segment in path {
        current = if is_index(segment) {
            current.get("items")?
        } else {
            current.get("properties")?.get(segment)?
        };
    }
    match current.get("type") {
        Some(Value::String(t)) => Some(t.clone()),
        Some(Value::Array(types)) => Some(
            types
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(", "),
        ),
        _ => None,
    }
}

fn push_violations(out: &mut Vec<Violation>, schema: &Value, error: ValidationError<'_>) {
    let path = pointer_segments(&error.instance_path.to_string());
    let field = path
        .last()
        .cloned()
        .unwrap_or_else(|| "(root)".to_owned());
    let description = error.to_string();
    let given = ValueKind::of(&error.instance).as_str().to_owned();

    let base = Violation {
        kind: ViolationKind::Unknown(String::new()),
        path: path.clone(),
        description,
        field,
        property: None,
        expected: None,
        given: None,
    };

    match error.kind {
        ValidationErrorKind::AdditionalProperties { unexpected } => {
            for property in unexpected {
                out.push(Violation {
                    kind: ViolationKind::AdditionalProperty,
                    description: format!("additional property '{property}' is not allowed"),
                    property: Some(property),
                    ..base.clone()
                });
            }
        }
        ValidationErrorKind::Required { property } => {
            let name = property
                .as_str()
                .map(str::to_owned)
                .unwrap_or_else(|| property.to_string());
            out.push(Violation {
                kind: ViolationKind::Required,
                property: Some(name),
                ..base
            });
        }
        ValidationErrorKind::Type { .. } => out.push(Violation {
            kind: ViolationKind::InvalidType,
            expected: schema_types_at(schema, &path),
            given: Some(given),
            ..base
        }),
        // A union under `items` reports element mismatches as anyOf failures;
        // those carry the same information as a type violation at the element.
        ValidationErrorKind::AnyOf => {
            let at_array_element = path.last().map(String::as_str).is_some_and(is_index);
            if at_array_element {
                out.push(Violation {
                    kind: ViolationKind::InvalidType,
                    expected: schema_types_at(schema, &path),
                    given: Some(given),
                    ..base
                });
            } else {
                out.push(Violation {
                    kind: ViolationKind::Unknown("any_of".to_owned()),
                    ..base
                });
            }
        }
        ValidationErrorKind::MinItems { .. } => out.push(Violation {
            kind: ViolationKind::ArrayMinItems,
            ..base
        }),
        ValidationErrorKind::MaxItems { .. } => out.push(Violation {
            kind: ViolationKind::ArrayMaxItems,
            ..base
        }),
        ValidationErrorKind::UniqueItems => out.push(Violation {
            kind: ViolationKind::UniqueItems,
            ..base
        }),
        ValidationErrorKind::Contains => out.push(Violation {
            kind: ViolationKind::Contains,
            ..base
        }),
        ValidationErrorKind::MinLength { .. } => out.push(Violation {
            kind: ViolationKind::StringMinLength,
            ..base
        }),
        ValidationErrorKind::MaxLength { .. } => out.push(Violation {
            kind: ViolationKind::StringMaxLength,
            ..base
        }),
        ValidationErrorKind::Pattern { .. } => out.push(Violation {
            kind: ViolationKind::Pattern,
            ..base
        }),
        ValidationErrorKind::MultipleOf { .. } => out.push(Violation {
            kind: ViolationKind::MultipleOf,
            ..base
        }),
        ValidationErrorKind::Minimum { .. } => out.push(Violation {
            kind: ViolationKind::NumberMinimum,
            ..base
        }),
        ValidationErrorKind::Maximum { .. } => out.push(Violation {
            kind: ViolationKind::NumberMaximum,
            ..base
        }),
        ValidationErrorKind::ExclusiveMinimum { .. } => out.push(Violation {
            kind: ViolationKind::NumberExclusiveMinimum,
            ..base
        }),
        ValidationErrorKind::ExclusiveMaximum { .. } => out.push(Violation {
            kind: ViolationKind::NumberExclusiveMaximum,
            ..base
        }),
        ValidationErrorKind::AdditionalItems { .. } => out.push(Violation {
            kind: ViolationKind::Unsupported("array_no_additional_items"),
            ..base
        }),
        ValidationErrorKind::MinProperties { .. } => out.push(Violation {
            kind: ViolationKind::Unsupported("array_min_properties"),
            ..base
        }),
        ValidationErrorKind::MaxProperties { .. } => out.push(Violation {
            kind: ViolationKind::Unsupported("array_max_properties"),
            ..base
        }),
        ValidationErrorKind::PropertyNames { .. } => out.push(Violation {
            kind: ViolationKind::Unsupported("invalid_property_name"),
            ..base
        }),
        other => {
            let label = format!("{other:?}");
            let label = label
                .split([' ', '{', '('])
                .next()
                .unwrap_or("unknown")
                .to_owned();
            out.push(Violation {
                kind: ViolationKind::Unknown(label),
                ..base
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn users_schema() -> Value {
        json!({
            "$schema": crate::SCHEMA_URI,
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "name": {"type": "string"},
                "age": {"type": "number"},
                "tags": {"type": "array", "items": {"type": "number"}},
            },
            "required": ["age", "name"],
        })
    }

    #[test]
    fn valid_payload_has_no_violations() {
        let v = validate(&users_schema(), &json!({"name": "John", "age": 30})).unwrap();
        assert!(v.valid);
        assert!(v.violations.is_empty());
    }

    #[test]
    fn additional_property_is_reported_per_property() {
        let v = validate(
            &users_schema(),
            &json!({"name": "John", "age": 30, "email": "j@x", "nick": "jj"}),
        )
        .unwrap();
        assert!(!v.valid);
        let mut props: Vec<&str> = v
            .violations
            .iter()
            .filter(|v| v.kind == ViolationKind::AdditionalProperty)
            .filter_map(|v| v.property.as_deref())
            .collect();
        props.sort();
        assert_eq!(props, ["email", "nick"]);
        assert!(v.violations.iter().all(|v| v.path.is_empty()));
    }

    #[test]
    fn missing_required_names_the_property() {
        let v = validate(&users_schema(), &json!({"name": "K"})).unwrap();
        assert_eq!(v.violations.len(), 1);
        let violation = &v.violations[0];
        assert_eq!(violation.kind, ViolationKind::Required);
        assert_eq!(violation.property.as_deref(), Some("age"));
        assert_eq!(violation.field, "(root)");
    }

    #[test]
    fn type_mismatch_carries_expected_and_given() {
        let v = validate(&users_schema(), &json!({"name": "John", "age": "thirty"})).unwrap();
        assert_eq!(v.violations.len(), 1);
        let violation = &v.violations[0];
        assert_eq!(violation.kind, ViolationKind::InvalidType);
        assert_eq!(violation.path, vec!["age".to_owned()]);
        assert_eq!(violation.expected.as_deref(), Some("number"));
        assert_eq!(violation.given.as_deref(), Some("string"));
    }

    #[test]
    fn array_element_mismatch_points_at_the_index() {
        let v = validate(
            &users_schema(),
            &json!({"name": "John", "age": 30, "tags": [1, "x"]}),
        )
        .unwrap();
        assert_eq!(v.violations.len(), 1);
        let violation = &v.violations[0];
        assert_eq!(violation.kind, ViolationKind::InvalidType);
        assert_eq!(violation.path, vec!["tags".to_owned(), "1".to_owned()]);
        assert_eq!(violation.given.as_deref(), Some("string"));
    }

    #[test]
    fn any_of_items_union_maps_to_invalid_type() {
        let schema = json!({
            "type": "object",
            "properties": {
                "tags": {
                    "type": "array",
                    "items": {"anyOf": [{"type": "number"}, {"type": "string"}]},
                },
            },
        });
        let v = validate(&schema, &json!({"tags": [1, "x", true]})).unwrap();
        assert_eq!(v.violations.len(), 1);
        let violation = &v.violations[0];
        assert_eq!(violation.kind, ViolationKind::InvalidType);
        assert_eq!(violation.path, vec!["tags".to_owned(), "2".to_owned()]);
        assert_eq!(violation.given.as_deref(), Some("boolean"));
    }

    #[test]
    fn constraint_keywords_map_to_their_kinds() {
        let schema = json!({
            "type": "object",
            "properties": {
                "a": {"type": "array", "minItems": 2},
                "b": {"type": "array", "maxItems": 1},
                "c": {"type": "array", "uniqueItems": true},
                "d": {"type": "string", "minLength": 10},
                "e": {"type": "string", "maxLength": 1},
                "f": {"type": "string", "pattern": "^ask"},
                "g": {"type": "number", "multipleOf": 2},
                "h": {"type": "number", "minimum": 5},
                "i": {"type": "number", "maximum": 5},
                "j": {"type": "number", "exclusiveMinimum": 5},
                "k": {"type": "number", "exclusiveMaximum": 5},
            },
        });
        let payload = json!({
            "a": [1],
            "b": [1, 2],
            "c": [1, 1],
            "d": "short",
            "e": "long",
            "f": "answer",
            "g": 3,
            "h": 4,
            "i": 6,
            "j": 5,
            "k": 5,
        });
        let v = validate(&schema, &payload).unwrap();
        let kind_of = |field: &str| {
            v.violations
                .iter()
                .find(|v| v.path.first().map(String::as_str) == Some(field))
                .map(|v| v.kind.clone())
                .unwrap()
        };
        assert_eq!(kind_of("a"), ViolationKind::ArrayMinItems);
        assert_eq!(kind_of("b"), ViolationKind::ArrayMaxItems);
        assert_eq!(kind_of("c"), ViolationKind::UniqueItems);
        assert_eq!(kind_of("d"), ViolationKind::StringMinLength);
        assert_eq!(kind_of("e"), ViolationKind::StringMaxLength);
        assert_eq!(kind_of("f"), ViolationKind::Pattern);
        assert_eq!(kind_of("g"), ViolationKind::MultipleOf);
        assert_eq!(kind_of("h"), ViolationKind::NumberMinimum);
        assert_eq!(kind_of("i"), ViolationKind::NumberMaximum);
        assert_eq!(kind_of("j"), ViolationKind::NumberExclusiveMinimum);
        assert_eq!(kind_of("k"), ViolationKind::NumberExclusiveMaximum);
    }

    #[test]
    fn broken_schema_is_invalid_schema() {
        let err = validate(&json!({"type": 12}), &json!({})).unwrap_err();
        assert!(matches!(err, InferenceError::InvalidSchema(_)));
    }

    #[test]
    fn check_schema_accepts_synthesized_output() {
        let schema = crate::create_schema(&json!({"a": 1}), "t").unwrap();
        check_schema(&schema).unwrap();
    }
}
