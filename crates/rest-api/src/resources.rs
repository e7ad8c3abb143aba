//! The resource API: the learn path, validation, and schema CRUD.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use haven_notify::Notifier;
use haven_store::{NewRevision, Resource, ResourceStore, ResourceVersion};
use schema_inference::{Violation, apply_payload, check_schema, validate};

use crate::errors::{ErrorBody, HavenAPIError, api_error};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ResourceStore>,
    pub notifier: Arc<dyn Notifier>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/add_payload", post(add_payload))
        .route("/api/v1/validate_payload", post(validate_payload))
        .route("/api/v1/set_schema", post(set_schema))
        .route("/api/v1/get_schema/{name}", get(get_schema))
        .route("/api/v1/get_resource/{name}", get(get_resource))
        .route("/api/v1/get_all_resources", get(get_all_resources))
        .route("/api/v1/get_resource_version/{id}", get(get_resource_version))
        .route(
            "/api/v1/get_resource_versions/{id}",
            get(get_resource_versions),
        )
        .route(
            "/api/v1/get_reference_payload/{id}",
            get(get_reference_payload),
        )
        .with_state(state)
}

type ApiError = (StatusCode, Json<ErrorBody>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn fail(err: impl Into<HavenAPIError>) -> ApiError {
    api_error(err.into())
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceBody {
    pub id: i64,
    pub name: String,
    pub schema: Value,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct AddPayloadRequest {
    #[serde(default)]
    pub resource: String,
    pub payload: Value,
}

#[derive(Debug, Serialize)]
pub struct AddPayloadResponse {
    pub success: bool,
    pub resource: ResourceBody,
}

#[derive(Debug, Deserialize)]
pub struct ValidatePayloadRequest {
    #[serde(default)]
    pub resource: String,
    pub payload: Value,
}

#[derive(Debug, Serialize)]
pub struct ValidatePayloadResponse {
    pub valid: bool,
    pub validation_errors: Vec<ValidationErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct ValidationErrorBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub context: ValidationContext,
}

#[derive(Debug, Serialize)]
pub struct ValidationContext {
    pub field: String,
    pub property: Option<String>,
    pub expected: Option<String>,
    pub given: Option<String>,
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct SetSchemaRequest {
    #[serde(default)]
    pub resource: String,
    pub schema: Value,
}

#[derive(Debug, Serialize)]
pub struct SetSchemaResponse {
    pub success: bool,
    pub resource: ResourceBody,
}

#[derive(Debug, Serialize)]
pub struct GetSchemaResponse {
    pub schema: Value,
}

#[derive(Debug, Serialize)]
pub struct GetResourceResponse {
    pub resource: ResourceBody,
}

#[derive(Debug, Serialize)]
pub struct GetAllResourcesResponse {
    pub resources: Vec<ResourceBody>,
}

#[derive(Debug, Serialize)]
pub struct VersionBody {
    pub id: i64,
    pub version: i64,
    pub resource_id: i64,
    pub reference_payload_id: Option<i64>,
    pub old_schema: Value,
    pub new_schema: Value,
}

#[derive(Debug, Serialize)]
pub struct GetResourceVersionResponse {
    pub version: VersionBody,
}

#[derive(Debug, Serialize)]
pub struct GetResourceVersionsResponse {
    pub versions: Vec<VersionBody>,
}

#[derive(Debug, Serialize)]
pub struct GetReferencePayloadResponse {
    pub id: i64,
    /// The exact payload text that forced the version, verbatim.
    pub payload: String,
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

fn parse_schema(text: &str) -> Result<Value, serde_json::Error> {
    if text.is_empty() {
        Ok(Value::Object(Map::new()))
    } else {
        serde_json::from_str(text)
    }
}

fn resource_body(resource: &Resource) -> Result<ResourceBody, ApiError> {
    let schema = parse_schema(&resource.schema)
        .map_err(|e| fail(HavenAPIError::SchemaCorruption(e.to_string())))?;
    Ok(ResourceBody {
        id: resource.id,
        name: resource.name.clone(),
        schema,
        version: resource.version,
        created_at: resource.created_at,
        updated_at: resource.updated_at,
    })
}

fn version_body(version: &ResourceVersion) -> Result<VersionBody, ApiError> {
    let old_schema = parse_schema(&version.old_schema)
        .map_err(|e| fail(HavenAPIError::SchemaCorruption(e.to_string())))?;
    let new_schema = parse_schema(&version.new_schema)
        .map_err(|e| fail(HavenAPIError::SchemaCorruption(e.to_string())))?;
    Ok(VersionBody {
        id: version.id,
        version: version.version,
        resource_id: version.resource_id,
        reference_payload_id: version.reference_payload_id,
        old_schema,
        new_schema,
    })
}

/// Dotted context path as exposed on the wire, e.g. `(root).tags.0.`
fn render_path(segments: &[String]) -> String {
    let mut path = String::from("(root).");
    for segment in segments {
        path.push_str(segment);
        path.push('.');
    }
    path
}

fn violation_body(violation: &Violation) -> ValidationErrorBody {
    ValidationErrorBody {
        kind: violation.kind.as_str().to_owned(),
        description: violation.description.clone(),
        context: ValidationContext {
            field: violation.field.clone(),
            property: violation.property.clone(),
            expected: violation.expected.clone(),
            given: violation.given.clone(),
            path: render_path(&violation.path),
        },
    }
}

fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse::<i64>()
        .map_err(|e| fail(HavenAPIError::BadRequest(format!("failed to parse id: {e}"))))
}

fn require_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    match body {
        Ok(Json(request)) => Ok(request),
        Err(rejection) => Err(fail(HavenAPIError::BadRequest(format!(
            "failed to parse json request: {rejection}"
        )))),
    }
}

async fn notify_schema_change(state: &AppState, resource: &str, version: i64) {
    if !state.notifier.is_active() {
        return;
    }
    let message =
        format!("New version `{version}` of schema for resource `{resource}` has been added");
    if let Err(error) = state.notifier.send(&message).await {
        warn!(%error, resource, "failed to queue schema-change notification");
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// The learn path: run inference under the resource's lock and persist any
/// schema change atomically with its version row and reference payload.
async fn add_payload(
    State(state): State<AppState>,
    body: Result<Json<AddPayloadRequest>, JsonRejection>,
) -> ApiResult<AddPayloadResponse> {
    let request = require_body(body)?;
    if request.resource.is_empty() {
        return Err(fail(HavenAPIError::BadRequest(
            "resource name is required".to_owned(),
        )));
    }

    let name = request.resource.clone();
    let payload = request.payload.clone();
    let payload_text = serde_json::to_string(&request.payload)
        .map_err(|e| fail(HavenAPIError::BadRequest(e.to_string())))?;

    let outcome = state
        .store
        .update_resource(
            &request.resource,
            Box::new(move |current: &Resource| {
                let old_schema =
                    parse_schema(&current.schema).context("stored schema is not valid JSON")?;
                match apply_payload(&old_schema, &payload, &name)? {
                    None => Ok(None),
                    Some(schema) => Ok(Some(NewRevision {
                        schema: serde_json::to_string(&schema)?,
                        reference_payload: Some(payload_text),
                    })),
                }
            }),
        )
        .await
        .map_err(fail)?;

    match &outcome.version {
        Some(version) => {
            info!(
                resource = %request.resource,
                version = version.version,
                "schema changed"
            );
            counter!("haven_schema_changes_total", "resource" => request.resource.clone())
                .increment(1);
            notify_schema_change(&state, &request.resource, version.version).await;
        }
        None => {
            info!(resource = %request.resource, "no changes to the schema");
        }
    }

    let resource = resource_body(&outcome.resource)?;
    Ok(Json(AddPayloadResponse {
        success: true,
        resource,
    }))
}

/// Validation never takes the learn-path lock: it reads the current committed
/// schema and may race a concurrent learner.
async fn validate_payload(
    State(state): State<AppState>,
    body: Result<Json<ValidatePayloadRequest>, JsonRejection>,
) -> ApiResult<ValidatePayloadResponse> {
    let request = require_body(body)?;
    counter!("haven_validation_requests_total").increment(1);

    let resource = state
        .store
        .get_resource(&request.resource)
        .await
        .map_err(fail)?
        .ok_or_else(|| fail(HavenAPIError::NotFound(format!("resource {}", request.resource))))?;

    let schema = parse_schema(&resource.schema)
        .map_err(|e| fail(HavenAPIError::SchemaCorruption(e.to_string())))?;
    let validation = validate(&schema, &request.payload).map_err(fail)?;

    Ok(Json(ValidatePayloadResponse {
        valid: validation.valid,
        validation_errors: validation.violations.iter().map(violation_body).collect(),
    }))
}

/// Explicit schema set. The version still bumps; the version row carries no
/// reference payload.
async fn set_schema(
    State(state): State<AppState>,
    body: Result<Json<SetSchemaRequest>, JsonRejection>,
) -> ApiResult<SetSchemaResponse> {
    let request = require_body(body)?;
    if request.resource.is_empty() {
        return Err(fail(HavenAPIError::BadRequest(
            "resource name is required".to_owned(),
        )));
    }
    check_schema(&request.schema)
        .map_err(|e| fail(HavenAPIError::BadRequest(e.to_string())))?;

    let schema_text = serde_json::to_string(&request.schema)
        .map_err(|e| fail(HavenAPIError::BadRequest(e.to_string())))?;

    let outcome = state
        .store
        .update_resource(
            &request.resource,
            Box::new(move |_current: &Resource| {
                Ok(Some(NewRevision {
                    schema: schema_text,
                    reference_payload: None,
                }))
            }),
        )
        .await
        .map_err(fail)?;

    counter!("haven_schema_changes_total", "resource" => request.resource.clone()).increment(1);

    let resource = resource_body(&outcome.resource)?;
    Ok(Json(SetSchemaResponse {
        success: true,
        resource,
    }))
}

async fn get_schema(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<GetSchemaResponse> {
    let resource = state
        .store
        .get_resource(&name)
        .await
        .map_err(fail)?
        .ok_or_else(|| fail(HavenAPIError::NotFound(format!("resource {name}"))))?;
    let schema = parse_schema(&resource.schema)
        .map_err(|e| fail(HavenAPIError::SchemaCorruption(e.to_string())))?;
    Ok(Json(GetSchemaResponse { schema }))
}

async fn get_resource(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<GetResourceResponse> {
    let resource = state
        .store
        .get_resource(&name)
        .await
        .map_err(fail)?
        .ok_or_else(|| fail(HavenAPIError::NotFound(format!("resource {name}"))))?;
    Ok(Json(GetResourceResponse {
        resource: resource_body(&resource)?,
    }))
}

async fn get_all_resources(State(state): State<AppState>) -> ApiResult<GetAllResourcesResponse> {
    let resources = state.store.get_all_resources().await.map_err(fail)?;
    let mut bodies = Vec::with_capacity(resources.len());
    for resource in &resources {
        bodies.push(resource_body(resource)?);
    }
    Ok(Json(GetAllResourcesResponse { resources: bodies }))
}

async fn get_resource_version(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<GetResourceVersionResponse> {
    let id = parse_id(&id)?;
    let version = state
        .store
        .get_resource_version(id)
        .await
        .map_err(fail)?
        .ok_or_else(|| fail(HavenAPIError::NotFound(format!("version {id}"))))?;
    Ok(Json(GetResourceVersionResponse {
        version: version_body(&version)?,
    }))
}

async fn get_resource_versions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<GetResourceVersionsResponse> {
    let resource_id = parse_id(&id)?;
    let versions = state
        .store
        .get_resource_versions(resource_id)
        .await
        .map_err(fail)?;
    if versions.is_empty() {
        return Err(fail(HavenAPIError::NotFound(format!(
            "versions for resource {resource_id}"
        ))));
    }
    let mut bodies = Vec::with_capacity(versions.len());
    for version in &versions {
        bodies.push(version_body(version)?);
    }
    Ok(Json(GetResourceVersionsResponse { versions: bodies }))
}

async fn get_reference_payload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<GetReferencePayloadResponse> {
    let id = parse_id(&id)?;
    let payload = state
        .store
        .get_reference_payload(id)
        .await
        .map_err(fail)?
        .ok_or_else(|| fail(HavenAPIError::NotFound(format!("reference payload {id}"))))?;
    Ok(Json(GetReferencePayloadResponse {
        id: payload.id,
        payload: payload.payload,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_rendering_matches_the_wire_format() {
        assert_eq!(render_path(&[]), "(root).");
        assert_eq!(render_path(&["age".to_owned()]), "(root).age.");
        assert_eq!(
            render_path(&["tags".to_owned(), "0".to_owned()]),
            "(root).tags.0."
        );
    }

    #[test]
    fn empty_schema_text_parses_to_an_empty_object() {
        assert_eq!(parse_schema("").unwrap(), Value::Object(Map::new()));
        assert!(parse_schema("not json").is_err());
    }
}
