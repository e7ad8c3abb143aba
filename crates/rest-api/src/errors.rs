use axum::{Json, http::StatusCode};
use haven_store::StoreError;
use schema_inference::InferenceError;
use serde::Serialize;
use tracing::error;

/// Wire shape for every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug)]
pub enum HavenAPIError {
    BadRequest(String),
    NotFound(String),
    /// A stored schema that no longer parses or compiles. The row stays
    /// as-is until an explicit schema set replaces it.
    SchemaCorruption(String),
    /// Expansion hit a validator error class it has no rule for.
    NotImplemented(String),
    Failed(anyhow::Error),
}

impl std::fmt::Display for HavenAPIError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HavenAPIError::BadRequest(msg) => write!(f, "{msg}"),
            HavenAPIError::NotFound(what) => write!(f, "{what} not found"),
            HavenAPIError::SchemaCorruption(msg) => {
                write!(f, "stored schema is corrupt: {msg}")
            }
            HavenAPIError::NotImplemented(msg) => std::fmt::Display::fmt(msg, f),
            HavenAPIError::Failed(e) => std::fmt::Display::fmt(e, f),
        }
    }
}

impl std::error::Error for HavenAPIError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HavenAPIError::Failed(err) => Some(err.root_cause()),
            _ => None,
        }
    }
}

impl From<StoreError> for HavenAPIError {
    fn from(err: StoreError) -> Self {
        match err {
            // Learn-path callbacks carry inference errors through the store;
            // recover the interesting classes for the error taxonomy.
            StoreError::Other(e) => match e.downcast::<InferenceError>() {
                Ok(
                    inference @ (InferenceError::NotImplemented(_)
                    | InferenceError::UnknownViolation(_)),
                ) => HavenAPIError::NotImplemented(inference.to_string()),
                Ok(InferenceError::InvalidSchema(detail)) => {
                    HavenAPIError::SchemaCorruption(detail)
                }
                Ok(other) => HavenAPIError::Failed(other.into()),
                Err(e) => HavenAPIError::Failed(e),
            },
            other => HavenAPIError::Failed(anyhow::Error::new(other)),
        }
    }
}

impl From<InferenceError> for HavenAPIError {
    fn from(err: InferenceError) -> Self {
        match err {
            InferenceError::InvalidSchema(detail) => HavenAPIError::SchemaCorruption(detail),
            err @ (InferenceError::NotImplemented(_) | InferenceError::UnknownViolation(_)) => {
                HavenAPIError::NotImplemented(err.to_string())
            }
            other => HavenAPIError::Failed(other.into()),
        }
    }
}

pub fn api_error(err: HavenAPIError) -> (StatusCode, Json<ErrorBody>) {
    error!(error = ?err, "request failed");
    let status = match err {
        HavenAPIError::BadRequest(_) => StatusCode::BAD_REQUEST,
        HavenAPIError::NotFound(_) => StatusCode::NOT_FOUND,
        HavenAPIError::SchemaCorruption(_)
        | HavenAPIError::NotImplemented(_)
        | HavenAPIError::Failed(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
}
