//! Error-path tests for the ingest endpoint.
//!
//! Every authentication failure must look the same to the caller.

use axum::http::StatusCode;
use axum_test::{TestResponse, TestServer};
use integration_tests::{fixtures, setup::TestContext};
use postgres_client::projects::{regenerate_public_key, set_project_active};
use postgres_client::NewProject;
use serde_json::json;

const INGEST: &str = "/api/events/ingest";

fn assert_generic_unauthorized(response: &TestResponse) {
    response.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(response.header("www-authenticate"), "Bearer");
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "AUTH_001");
    assert_eq!(body["error"], "Invalid or missing API key");
    assert!(body.get("details").is_none(), "Failure reason must not leak");
}

#[tokio::test]
async fn test_missing_authorization_header() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let response = server.post(INGEST).json(&fixtures::event("page_view")).await;

    assert_generic_unauthorized(&response);
    assert_eq!(ctx.queue.event_count(), 0);
}

#[tokio::test]
async fn test_rejected_credentials_are_indistinguishable() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");
    let created = ctx.create_project("shop").await;

    let attempts = [
        format!("Basic {}", created.keys.public_key),
        format!("Bearer{}", created.keys.public_key),
        "Bearer not-a-key".to_string(),
        fixtures::bearer("sa_AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"),
        // Dashboard key on the ingest endpoint
        fixtures::bearer(&created.keys.private_key),
    ];

    for header in attempts {
        let response = server
            .post(INGEST)
            .add_header("Authorization", &header)
            .json(&fixtures::event("page_view"))
            .await;
        assert_generic_unauthorized(&response);
    }
    assert_eq!(ctx.queue.event_count(), 0);
}

#[tokio::test]
async fn test_inactive_project_is_unauthorized() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");
    let created = ctx.create_project_with(NewProject::new("paused").inactive()).await;

    let response = server
        .post(INGEST)
        .add_header("Authorization", &fixtures::bearer(&created.keys.public_key))
        .json(&fixtures::event("page_view"))
        .await;

    assert_generic_unauthorized(&response);
}

#[tokio::test]
async fn test_deactivation_takes_effect_immediately() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");
    let created = ctx.create_project("shop").await;
    let auth = fixtures::bearer(&created.keys.public_key);

    server
        .post(INGEST)
        .add_header("Authorization", &auth)
        .json(&fixtures::event("page_view"))
        .await
        .assert_status(StatusCode::ACCEPTED);

    set_project_active(&ctx.store, created.project.id, false).await.unwrap();

    let response = server
        .post(INGEST)
        .add_header("Authorization", &auth)
        .json(&fixtures::event("page_view"))
        .await;
    assert_generic_unauthorized(&response);
}

#[tokio::test]
async fn test_regenerated_key_replaces_old_key() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");
    let created = ctx.create_project("shop").await;

    let new_key = regenerate_public_key(&ctx.store, created.project.id).await.unwrap();
    assert_ne!(new_key, created.keys.public_key);

    let old = server
        .post(INGEST)
        .add_header("Authorization", &fixtures::bearer(&created.keys.public_key))
        .json(&fixtures::event("page_view"))
        .await;
    assert_generic_unauthorized(&old);

    server
        .post(INGEST)
        .add_header("Authorization", &fixtures::bearer(&new_key))
        .json(&fixtures::event("page_view"))
        .await
        .assert_status(StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_missing_event_name_returns_field_errors() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");
    let created = ctx.create_project("shop").await;

    let response = server
        .post(INGEST)
        .add_header("Authorization", &fixtures::bearer(&created.keys.public_key))
        .json(&json!({ "properties": { "a": 1 } }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "VALID_001");
    assert!(body["details"]["event_name"].is_array());
    assert_eq!(ctx.queue.event_count(), 0);
}

#[tokio::test]
async fn test_invalid_fields_are_all_reported() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");
    let created = ctx.create_project("shop").await;

    let response = server
        .post(INGEST)
        .add_header("Authorization", &fixtures::bearer(&created.keys.public_key))
        .json(&json!({
            "event_name": "x".repeat(256),
            "properties": ["not", "an", "object"],
            "timestamp": "yesterday",
        }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    let details = &body["details"];
    assert!(details["event_name"].is_array());
    assert!(details["properties"].is_array());
    assert!(details["timestamp"].is_array());
}

#[tokio::test]
async fn test_oversized_properties_rejected() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");
    let created = ctx.create_project("shop").await;

    let response = server
        .post(INGEST)
        .add_header("Authorization", &fixtures::bearer(&created.keys.public_key))
        .json(&json!({
            "event_name": "upload",
            "properties": { "blob": "x".repeat(70 * 1024) },
        }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    let message = body["details"]["properties"][0].as_str().unwrap();
    assert!(message.contains("too large"), "unexpected message: {}", message);
}

#[tokio::test]
async fn test_malformed_json_body() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");
    let created = ctx.create_project("shop").await;

    let response = server
        .post(INGEST)
        .content_type(fixtures::JSON)
        .add_header("Authorization", &fixtures::bearer(&created.keys.public_key))
        .bytes("{ invalid json }".as_bytes().into())
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "VALID_001");
    assert!(body["details"]["body"].is_array());
}

#[tokio::test]
async fn test_queue_failure_returns_500() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");
    let created = ctx.create_project("shop").await;

    ctx.queue.set_should_fail(true);

    let response = server
        .post(INGEST)
        .add_header("Authorization", &fixtures::bearer(&created.keys.public_key))
        .json(&fixtures::event("page_view"))
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "QUEUE_001");
    assert_eq!(body["error"], "Failed to process event");
}
