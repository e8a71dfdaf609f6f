//! Health endpoint tests.
//!
//! The health registry is process-global, so state-changing assertions live
//! in a single test.

use axum::http::StatusCode;
use axum_test::TestServer;
use integration_tests::{fixtures, setup::TestContext};

#[tokio::test]
async fn test_health_reflects_dependencies() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");
    let created = ctx.create_project("health").await;

    for _ in 0..3 {
        server
            .post("/api/events/ingest")
            .add_header("Authorization", &fixtures::bearer(&created.keys.public_key))
            .json(&fixtures::event("page_view"))
            .await
            .assert_status(StatusCode::ACCEPTED);
    }

    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["redis_connected"], true);
    assert_eq!(body["postgres_connected"], true);
    assert_eq!(body["stream_length"], 3);

    // Counters are process-wide, so other tests may have added to them
    let counters = &body["metrics"];
    assert!(counters["events_received"].as_u64().unwrap() >= 3);
    assert!(counters["events_accepted"].as_u64().unwrap() >= 3);
    assert!(counters["ingest_latency_mean_ms"].is_number());

    server.get("/health/ready").await.assert_status_ok();

    // Stream goes away
    ctx.queue.set_should_fail(true);

    let response = server.get("/health").await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["redis_connected"], false);
    assert_eq!(body["postgres_connected"], true);
    assert_eq!(body["stream_length"], 0);

    server
        .get("/health/ready")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);

    // Liveness never depends on the stores
    server.get("/health/live").await.assert_status_ok();

    ctx.queue.set_should_fail(false);
    server.get("/health").await.assert_status_ok();
}

#[tokio::test]
async fn test_health_needs_no_credentials() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    server.get("/health/live").await.assert_status_ok();

    let body: serde_json::Value = server.get("/health").await.json();
    assert!(body.get("code").is_none());
}
