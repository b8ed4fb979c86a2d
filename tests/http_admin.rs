mod support;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use dataapi_sdk::{app, parse_and_substitute, AppState, ConfigProvider, EnvVarReplacement, Settings};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use support::*;
use tower::ServiceExt;

fn settings() -> Settings {
    Settings {
        stage_timeout: Duration::from_secs(2),
        introspection_timeout: Duration::from_millis(200),
        max_config_bytes: 64 * 1024,
        ..Settings::default()
    }
}

fn state() -> AppState {
    AppState::new(settings(), Arc::new(ConfigProvider::new()), factory())
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(b) => request.body(Body::from(b.to_string())).unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn post_body(doc: &Value) -> Value {
    json!({ "configuration": doc.to_string() })
}

#[tokio::test]
async fn first_configuration_wins_and_resubmission_conflicts() {
    let router = app(state());
    let (status, _) = send(&router, "GET", "/ready", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let doc = two_sources("postgres://one", "postgres://two");
    let (status, body) = send(&router, "POST", "/configuration", Some(post_body(&doc))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["initialization"]["succeeded"], json!(["db1", "db2"]));

    let (status, body) = send(&router, "POST", "/configuration", Some(post_body(&doc))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "already_configured");

    let (status, body) = send(&router, "GET", "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stage"], "ready");
}

#[tokio::test]
async fn malformed_submission_is_bad_request() {
    let router = app(state());
    let (status, body) = send(&router, "POST", "/configuration", Some(json!({ "configuration": "{ not json" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_configuration");
}

#[tokio::test]
async fn failed_stage_is_reported_with_cause() {
    let router = app(state());
    let (status, body) = send(&router, "POST", "/configuration", Some(post_body(&graphdb()))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["details"]["stage"], "rebuilding_metadata");
    assert!(body["error"]["details"]["cause"].as_str().unwrap().contains("graphdb"));

    let (status, body) = send(&router, "GET", "/configuration/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["stage"], "failed");
    assert_eq!(body["data"]["ready"], false);
    assert_eq!(body["data"]["late_configured"], true);
}

#[tokio::test]
async fn overrides_are_merged_before_parsing() {
    let router = app(state());
    let base = two_sources("@env('DATAAPI_TEST_UNSET_CONNECTION')", "postgres://two");
    let overrides = json!({ "data-sources": { "db1": { "connection-string": "postgres://one" } } });
    let (status, body) = send(
        &router,
        "POST",
        "/configuration/v2",
        Some(json!({
            "configuration": base.to_string(),
            "configuration-overrides": overrides.to_string()
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

#[tokio::test]
async fn reload_requires_a_configuration() {
    let router = app(state());
    let doc = two_sources("postgres://one", "postgres://two");
    let (status, body) = send(&router, "POST", "/configuration/reload", Some(post_body(&doc))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "not_configured");
}

#[tokio::test]
async fn entity_added_at_runtime_is_applied() {
    let state = state();
    let router = app(state.clone());
    let doc = two_sources("postgres://one", "postgres://two");
    send(&router, "POST", "/configuration", Some(post_body(&doc))).await;

    let entity = json!({
        "name": "Author",
        "entity": {
            "source": { "object": "authors" },
            "permissions": [{ "role": "anonymous", "actions": ["*"] }]
        }
    });
    let (status, body) = send(&router, "POST", "/configuration/entities", Some(entity.clone())).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["version"], 2);
    assert!(state.permissions.is_allowed(
        "Author",
        "authenticated",
        dataapi_sdk::service::EntityAction::Delete
    ));

    assert!(state.config_provider.is_late_configured());

    let (status, _) = send(&router, "POST", "/configuration/entities", Some(entity)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&router, "GET", "/openapi", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["paths"]["/api/Author"].is_object());
}

#[tokio::test]
async fn oversized_submission_is_refused() {
    let router = app(state());
    let padding = "x".repeat(128 * 1024);
    let (status, _) = send(&router, "POST", "/configuration", Some(json!({ "configuration": padding }))).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn rejected_boot_file_leaves_reload_available() {
    let boot = parse_and_substitute(&graphdb().to_string(), &EnvVarReplacement::disabled()).unwrap();
    let state = AppState::new(settings(), Arc::new(ConfigProvider::with_snapshot(Arc::new(boot))), factory());
    assert!(!state.apply_current().await);
    let router = app(state);

    let (status, body) = send(&router, "GET", "/ready", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["stage"], "failed");

    let doc = two_sources("postgres://one", "postgres://two");
    let (status, body) = send(&router, "POST", "/configuration/reload", Some(post_body(&doc))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let (status, _) = send(&router, "GET", "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn openapi_is_withheld_when_it_does_not_describe_the_current_configuration() {
    let router = app(state());
    let mut doc = two_sources("postgres://one", "postgres://two");
    send(&router, "POST", "/configuration", Some(post_body(&doc))).await;
    let (status, body) = send(&router, "GET", "/openapi", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["version"], 1);

    doc["entities"]["Book"]["rest"] = json!({ "enabled": false });
    doc["entities"]["Report"]["rest"] = json!({ "enabled": false });
    let (status, body) = send(&router, "POST", "/configuration/reload", Some(post_body(&doc))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["diagnostics"][0].as_str().unwrap().contains("no REST-enabled entities"));

    let (status, _) = send(&router, "GET", "/openapi", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
