//! End-to-end scenarios against the full router with a real in-memory store.

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use serde_json::{Value, json};
use tower::ServiceExt;

use haven_notify::NullNotifier;
use haven_store::SqliteResourceStore;
use rest_api::AppState;

fn app() -> Router {
    let store = SqliteResourceStore::in_memory().unwrap();
    rest_api::router(AppState {
        store: Arc::new(store),
        notifier: Arc::new(NullNotifier),
    })
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(app, Method::POST, uri, Some(body.to_string())).await
}

async fn post_raw(app: &Router, uri: &str, body: &str) -> (StatusCode, Value) {
    send(app, Method::POST, uri, Some(body.to_owned())).await
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Method::GET, uri, None).await
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<String>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.map(Body::from).unwrap_or_else(Body::empty))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn health_reports_ok() {
    let app = app();
    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"message": "OK"}));
}

#[tokio::test]
async fn first_payload_creates_the_schema() {
    let app = app();
    let (status, body) = post(
        &app,
        "/api/v1/add_payload",
        json!({"resource": "users", "payload": {"name": "John", "age": 30}}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    let resource = &body["resource"];
    assert_eq!(resource["name"], json!("users"));
    assert_eq!(resource["version"], json!(1));
    let schema = &resource["schema"];
    assert_eq!(schema["additionalProperties"], json!(false));
    assert_eq!(schema["title"], json!("users"));
    assert_eq!(schema["required"], json!(["age", "name"]));
    assert_eq!(
        schema["properties"],
        json!({"age": {"type": "number"}, "name": {"type": "string"}})
    );
}

#[tokio::test]
async fn compatible_payload_is_a_no_op() {
    let app = app();
    let payload = json!({"resource": "users", "payload": {"name": "John", "age": 30}});
    post(&app, "/api/v1/add_payload", payload.clone()).await;
    let (status, body) = post(&app, "/api/v1/add_payload", payload).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resource"]["version"], json!(1));

    let id = body["resource"]["id"].as_i64().unwrap();
    let (_, versions) = get(&app, &format!("/api/v1/get_resource_versions/{id}")).await;
    assert_eq!(versions["versions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn new_property_widens_the_schema() {
    let app = app();
    post(
        &app,
        "/api/v1/add_payload",
        json!({"resource": "users", "payload": {"name": "John", "age": 30}}),
    )
    .await;
    let (status, body) = post(
        &app,
        "/api/v1/add_payload",
        json!({"resource": "users", "payload": {"name": "Jane", "age": 25, "email": "j@x"}}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let resource = &body["resource"];
    assert_eq!(resource["version"], json!(2));
    assert_eq!(
        resource["schema"]["properties"]["email"],
        json!({"type": "string"})
    );
    // The new property is admitted but not required.
    assert_eq!(resource["schema"]["required"], json!(["age", "name"]));
}

#[tokio::test]
async fn type_change_becomes_a_union() {
    let app = app();
    post(
        &app,
        "/api/v1/add_payload",
        json!({"resource": "users", "payload": {"name": "John", "age": 30}}),
    )
    .await;
    let (status, body) = post(
        &app,
        "/api/v1/add_payload",
        json!({"resource": "users", "payload": {"name": "John", "age": "thirty"}}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let resource = &body["resource"];
    assert_eq!(resource["version"], json!(2));
    assert_eq!(
        resource["schema"]["properties"]["age"]["type"],
        json!(["number", "string"])
    );
}

#[tokio::test]
async fn missing_required_property_is_dropped() {
    let app = app();
    post(
        &app,
        "/api/v1/add_payload",
        json!({"resource": "users", "payload": {"name": "John", "age": 30}}),
    )
    .await;
    let (status, body) = post(
        &app,
        "/api/v1/add_payload",
        json!({"resource": "users", "payload": {"name": "K"}}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let resource = &body["resource"];
    assert_eq!(resource["version"], json!(2));
    assert_eq!(resource["schema"]["required"], json!(["name"]));
}

#[tokio::test]
async fn parallel_writers_converge_without_lost_updates() {
    let app = app();
    let payload = json!({"resource": "hot", "payload": {"name": "John", "age": 30}});

    let mut handles = Vec::new();
    for _ in 0..16 {
        let app = app.clone();
        let payload = payload.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..5 {
                let (status, _) = post(&app, "/api/v1/add_payload", payload.clone()).await;
                assert_eq!(status, StatusCode::OK);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Identical payloads: exactly one writer created version 1; nobody
    // observed a duplicate or lost update.
    let (_, body) = get(&app, "/api/v1/get_resource/hot").await;
    assert_eq!(body["resource"]["version"], json!(1));
    let id = body["resource"]["id"].as_i64().unwrap();
    let (_, versions) = get(&app, &format!("/api/v1/get_resource_versions/{id}")).await;
    assert_eq!(versions["versions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn learned_schema_validates_its_payloads() {
    let app = app();
    let payloads = [
        json!({"name": "John", "age": 30}),
        json!({"name": "Jane", "age": 25, "email": "j@x"}),
        json!({"name": "John", "age": "thirty"}),
        json!({"name": "K"}),
    ];
    for payload in &payloads {
        let (status, _) = post(
            &app,
            "/api/v1/add_payload",
            json!({"resource": "users", "payload": payload}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    for payload in &payloads {
        let (status, body) = post(
            &app,
            "/api/v1/validate_payload",
            json!({"resource": "users", "payload": payload}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], json!(true), "payload {payload} rejected");
    }
}

#[tokio::test]
async fn validation_reports_structured_errors() {
    let app = app();
    post(
        &app,
        "/api/v1/add_payload",
        json!({"resource": "users", "payload": {"name": "John", "age": 30}}),
    )
    .await;

    let (status, body) = post(
        &app,
        "/api/v1/validate_payload",
        json!({"resource": "users", "payload": {"name": "John", "age": "thirty"}}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], json!(false));
    let errors = body["validation_errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["type"], json!("invalid_type"));
    let context = &errors[0]["context"];
    assert_eq!(context["field"], json!("age"));
    assert_eq!(context["expected"], json!("number"));
    assert_eq!(context["given"], json!("string"));
    assert_eq!(context["path"], json!("(root).age."));
}

#[tokio::test]
async fn validate_payload_unknown_resource_is_not_found() {
    let app = app();
    let (status, body) = post(
        &app,
        "/api/v1/validate_payload",
        json!({"resource": "ghost", "payload": {}}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn set_schema_creates_and_bumps_with_null_reference() {
    let app = app();
    let schema = json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "properties": {"sku": {"type": "string"}},
        "required": ["sku"],
        "additionalProperties": false,
    });

    let (status, body) = post(
        &app,
        "/api/v1/set_schema",
        json!({"resource": "orders", "schema": schema}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["resource"]["version"], json!(1));

    let (status, body) = post(
        &app,
        "/api/v1/set_schema",
        json!({"resource": "orders", "schema": schema}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resource"]["version"], json!(2));

    let id = body["resource"]["id"].as_i64().unwrap();
    let (_, versions) = get(&app, &format!("/api/v1/get_resource_versions/{id}")).await;
    let versions = versions["versions"].as_array().unwrap();
    assert_eq!(versions.len(), 2);
    for version in versions {
        assert_eq!(version["reference_payload_id"], Value::Null);
    }
    // Contiguity: each version's old schema is its predecessor's new schema.
    assert_eq!(versions[0]["old_schema"], json!({}));
    assert_eq!(versions[1]["old_schema"], versions[0]["new_schema"]);
}

#[tokio::test]
async fn set_schema_rejects_an_uncompilable_schema() {
    let app = app();
    let (status, _) = post(
        &app,
        "/api/v1/set_schema",
        json!({"resource": "orders", "schema": {"type": 12}}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn inferred_versions_carry_their_reference_payload() {
    let app = app();
    let (_, body) = post(
        &app,
        "/api/v1/add_payload",
        json!({"resource": "users", "payload": {"name": "John", "age": 30}}),
    )
    .await;
    let id = body["resource"]["id"].as_i64().unwrap();

    let (_, versions) = get(&app, &format!("/api/v1/get_resource_versions/{id}")).await;
    let version = &versions["versions"][0];
    let payload_id = version["reference_payload_id"].as_i64().unwrap();

    let (status, body) = get(&app, &format!("/api/v1/get_reference_payload/{payload_id}")).await;
    assert_eq!(status, StatusCode::OK);
    let stored: Value = serde_json::from_str(body["payload"].as_str().unwrap()).unwrap();
    assert_eq!(stored, json!({"name": "John", "age": 30}));

    let version_id = version["id"].as_i64().unwrap();
    let (status, single) = get(&app, &format!("/api/v1/get_resource_version/{version_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(single["version"]["version"], json!(1));
    assert_eq!(single["version"]["old_schema"], json!({}));
}

#[tokio::test]
async fn get_all_resources_lists_everything() {
    let app = app();
    for name in ["alpha", "beta"] {
        post(
            &app,
            "/api/v1/add_payload",
            json!({"resource": name, "payload": {"x": 1}}),
        )
        .await;
    }
    let (status, body) = get(&app, "/api/v1/get_all_resources").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resources"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn get_schema_round_trips() {
    let app = app();
    post(
        &app,
        "/api/v1/add_payload",
        json!({"resource": "users", "payload": {"name": "John"}}),
    )
    .await;
    let (status, body) = get(&app, "/api/v1/get_schema/users").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["schema"]["title"], json!("users"));
}

#[tokio::test]
async fn missing_rows_return_not_found() {
    let app = app();
    for uri in [
        "/api/v1/get_schema/ghost",
        "/api/v1/get_resource/ghost",
        "/api/v1/get_resource_version/99",
        "/api/v1/get_resource_versions/99",
        "/api/v1/get_reference_payload/99",
    ] {
        let (status, body) = get(&app, uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert!(body["error"].is_string(), "{uri}");
    }
}

#[tokio::test]
async fn bad_requests_are_rejected() {
    let app = app();

    let (status, body) = post_raw(&app, "/api/v1/add_payload", "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = post(&app, "/api/v1/add_payload", json!({"payload": {"a": 1}})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(&app, "/api/v1/get_resource_version/not-a-number").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(&app, "/api/v1/get_resource_versions/not-a-number").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn mixed_nested_array_payload_is_a_server_error() {
    let app = app();
    let (status, body) = post(
        &app,
        "/api/v1/add_payload",
        json!({"resource": "users", "payload": {"items": [1, {"a": 2}]}}),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .contains("mixed nested types")
    );

    // The failed learn attempt left nothing behind.
    let (status, _) = get(&app, "/api/v1/get_resource/users").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
