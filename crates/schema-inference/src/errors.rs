use thiserror::Error;

/// Errors raised by schema synthesis, validation, and expansion.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// The schema itself does not compile as draft 2020-12.
    #[error("schema is not a valid draft 2020-12 document: {0}")]
    InvalidSchema(String),

    /// Array payload mixes scalar elements with nested objects or arrays.
    #[error("can't handle arrays with mixed nested types")]
    MixedNestedTypes,

    /// A violation kind the expander knows about but has no rule for yet.
    #[error("schema expansion is not implemented for: {0}")]
    NotImplemented(String),

    /// A violation kind outside the expander's closed vocabulary.
    #[error("unknown schema validation error type: {0}")]
    UnknownViolation(String),

    /// Schema and violation disagree about the document shape, e.g. a
    /// violation path that does not resolve to a sub-schema.
    #[error("malformed schema at '{path}': {reason}")]
    SchemaShape { path: String, reason: String },
}

impl InferenceError {
    pub(crate) fn shape(path: &[String], reason: impl Into<String>) -> Self {
        Self::SchemaShape {
            path: format!("/{}", path.join("/")),
            reason: reason.into(),
        }
    }
}

/// Result type for inference operations.
pub type InferenceResult<T> = Result<T, InferenceError>;
