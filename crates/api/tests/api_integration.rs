//! API integration tests.
//!
//! These drive the router against the in-memory backend.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
    response::Response,
};
use courier_api::{AppState, router as api_router};
use courier_common::config::{
    ArchiveConfig, Config, DatabaseConfig, DeliveryConfig, FederationConfig, LoggingConfig,
    ServerConfig,
};
use courier_core::IngestHooks;
use courier_db::Stores;
use serde_json::{Value, json};
use tower::ServiceExt;

/// Create a test configuration.
fn create_test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 3000,
            url: "https://local.example".to_string(),
        },
        database: DatabaseConfig {
            url: "memory://".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        redis: None,
        federation: FederationConfig {
            enabled: false,
            local_domain: "local.example".to_string(),
            user_agent: "courier-test".to_string(),
            inbox_path: "/inbox".to_string(),
        },
        delivery: DeliveryConfig::default(),
        archive: ArchiveConfig::default(),
        logging: LoggingConfig::default(),
    }
}

fn create_test_router() -> Router {
    let state = AppState::new(&Stores::memory(), &create_test_config(), IngestHooks::new());
    api_router().with_state(state)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> Response {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn inbox_event(event_id: &str, sequence: i64) -> Value {
    json!({
        "eventId": event_id,
        "originDomain": "A.Example",
        "eventType": "note.created",
        "streamId": "notes",
        "sequence": sequence,
        "payload": "eyJ0ZXh0IjoiaGkifQ==",
    })
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_router();
    let response = send(&app, "GET", "/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "ok");
}

#[tokio::test]
async fn test_metrics_are_prometheus_text() {
    let app = create_test_router();
    let response = send(&app, "GET", "/metrics", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("courier_events_produced_total"));
}

#[tokio::test]
async fn test_produce_and_read_status() {
    let app = create_test_router();

    let response = send(
        &app,
        "POST",
        "/outbox",
        Some(json!({
            "streamId": "notes",
            "eventType": "note.created",
            "payload": "e30=",
            "targetDomains": ["B.example", "c.example", "local.example"],
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = json_body(response).await["data"].clone();
    assert_eq!(created["status"], "pending");
    assert_eq!(created["sequence"], 1);
    assert_eq!(created["archived"], false);
    assert_eq!(created["targetDomains"], json!(["b.example", "c.example"]));

    let id = created["id"].as_str().unwrap();
    let response = send(&app, "GET", &format!("/outbox/{id}"), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"]["id"], id);

    let response = send(&app, "GET", "/outbox?status=pending", None).await;
    let listed = json_body(response).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_produce_uses_subscriptions_without_explicit_targets() {
    let app = create_test_router();

    let response = send(
        &app,
        "POST",
        "/subscriptions",
        Some(json!({ "streamId": "notes", "domain": "b.example" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(
        &app,
        "POST",
        "/outbox",
        Some(json!({ "streamId": "notes", "eventType": "note.created" })),
    )
    .await;
    let created = json_body(response).await["data"].clone();
    assert_eq!(created["targetDomains"], json!(["b.example"]));
}

#[tokio::test]
async fn test_produce_with_no_targets_is_delivered() {
    let app = create_test_router();
    let response = send(
        &app,
        "POST",
        "/outbox",
        Some(json!({ "streamId": "notes", "eventType": "note.created", "targetDomains": [] })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = json_body(response).await["data"].clone();
    assert_eq!(created["status"], "delivered");
    assert!(created["nextRetryAt"].is_null());
}

#[tokio::test]
async fn test_unknown_outbox_event_is_not_found() {
    let app = create_test_router();
    let response = send(&app, "GET", "/outbox/missing", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(json_body(response).await["error"]["code"].is_string());
}

#[tokio::test]
async fn test_unknown_status_filter_is_bad_request() {
    let app = create_test_router();
    let response = send(&app, "GET", "/outbox?status=lost", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_ingest_is_idempotent() {
    let app = create_test_router();

    let first = json_body(send(&app, "POST", "/inbox", Some(inbox_event("e1", 1))).await).await;
    assert_eq!(first["data"]["status"], "accepted");
    assert_eq!(first["data"]["originDomain"], "a.example");

    let response = send(&app, "POST", "/inbox", Some(inbox_event("e1", 1))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"]["status"], "duplicate");

    let response = send(&app, "GET", "/streams/a.example/notes/events", None).await;
    let events = json_body(response).await["data"].clone();
    assert_eq!(events.as_array().unwrap().len(), 1);
    assert_eq!(events[0]["payload"], "eyJ0ZXh0IjoiaGkifQ==");
}

#[tokio::test]
async fn test_ingest_rejects_invalid_event() {
    let app = create_test_router();
    let mut event = inbox_event("e1", 0);
    event["originDomain"] = json!("not a domain");
    let response = send(&app, "POST", "/inbox", Some(event)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stream_position_ratchets() {
    let app = create_test_router();
    let uri = "/streams/a.example/notes/position";

    let response = send(&app, "GET", uri, None).await;
    assert_eq!(json_body(response).await["data"]["lastSequence"], 0);

    let response = send(&app, "POST", uri, Some(json!({ "sequence": 5 }))).await;
    assert_eq!(json_body(response).await["data"]["lastSequence"], 5);

    let response = send(&app, "POST", uri, Some(json!({ "sequence": 3 }))).await;
    assert_eq!(json_body(response).await["data"]["lastSequence"], 5);
}

#[tokio::test]
async fn test_ingest_reports_gap_against_position() {
    let app = create_test_router();
    send(
        &app,
        "POST",
        "/streams/a.example/notes/position",
        Some(json!({ "sequence": 2 })),
    )
    .await;

    let receipt = json_body(send(&app, "POST", "/inbox", Some(inbox_event("e5", 5))).await).await;
    assert_eq!(receipt["data"]["lastSequence"], 2);
    assert_eq!(
        receipt["data"]["gap"],
        json!({ "kind": "ahead", "missingFrom": 3, "missingTo": 4 })
    );
}

#[tokio::test]
async fn test_stream_events_with_oversized_limit() {
    let app = create_test_router();
    send(&app, "POST", "/inbox", Some(inbox_event("e1", 1))).await;
    send(&app, "POST", "/inbox", Some(inbox_event("e2", 2))).await;

    let response = send(
        &app,
        "GET",
        "/streams/a.example/notes/events?limit=18446744073709551615",
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_unknown_peer_is_not_found() {
    let app = create_test_router();
    let response = send(&app, "GET", "/peers/x.example", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&app, "GET", "/peers/unreachable", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"], json!([]));
}

#[tokio::test]
async fn test_archive_starts_empty() {
    let app = create_test_router();
    let response = send(&app, "GET", "/archive/partitions", None).await;
    assert_eq!(json_body(response).await["data"], json!([]));

    let response = send(&app, "GET", "/archive/inbound/a.example/notes?after=0", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"], json!([]));
}
