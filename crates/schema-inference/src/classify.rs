use std::fmt;

use serde_json::Value;

/// JSON Schema type tag for a decoded JSON value.
///
/// Integers and floats both classify as `Number`, matching JSON Schema's
/// numeric unification. Variants are declared in the lexicographic order of
/// their type names so that sorting kinds sorts their names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValueKind {
    Array,
    Boolean,
    Null,
    Number,
    Object,
    String,
}

impl ValueKind {
    /// Classify a decoded JSON value. Total: every `Value` has exactly one tag.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Boolean,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }

    /// The JSON Schema `type` keyword value for this tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Array => "array",
            Self::Boolean => "boolean",
            Self::Null => "null",
            Self::Number => "number",
            Self::Object => "object",
            Self::String => "string",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
