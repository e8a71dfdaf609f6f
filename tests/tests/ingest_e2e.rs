//! End-to-end tests for the ingest pipeline.
//!
//! Most tests run the gate against a MockQueue that implements the same
//! EventQueue trait as the stream producer, then inspect what would have
//! been queued. The pipeline tests at the bottom go through the real Redis
//! stream and the materializer into Postgres.
//!
//! Requires Docker unless INGEST_TEST_DATABASE_URL / INGEST_TEST_REDIS_URL
//! point at running servers.

use axum::http::StatusCode;
use axum_test::TestServer;
use ingest_core::SamplingStrategy;
use integration_tests::{fixtures, setup::TestContext};
use postgres_client::dashboard::query_events;
use postgres_client::events::count_events;
use postgres_client::sources::list_active_sources;
use postgres_client::{EventFilter, NewProject, PageRequest};

const INGEST: &str = "/api/events/ingest";

#[tokio::test]
async fn test_ingest_accepts_and_queues_event() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");
    let created = ctx.create_project("shop").await;

    let response = server
        .post(INGEST)
        .add_header("Authorization", &fixtures::bearer(&created.keys.public_key))
        .add_header("User-Agent", fixtures::TEST_USER_AGENT)
        .add_header("X-Forwarded-For", "203.0.113.7, 10.0.0.1")
        .json(&fixtures::identified_event("page_view", "user-1", "sess-1"))
        .await;

    response.assert_status(StatusCode::ACCEPTED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["sampled"], false);

    let captured = ctx.queue.captured_events();
    assert_eq!(captured.len(), 1);
    let queued = &captured[0];
    assert_eq!(queued.project_id, created.project.id);
    assert_eq!(queued.event_name, "page_view");
    assert_eq!(queued.user_id.as_deref(), Some("user-1"));
    assert_eq!(queued.session_id.as_deref(), Some("sess-1"));
    assert_eq!(queued.ip_address, "203.0.113.7");
    assert_eq!(queued.user_agent, fixtures::TEST_USER_AGENT);
    assert_eq!(queued.event_properties["plan"], "pro");
    assert!(queued.event_source_id.is_none());
}

#[tokio::test]
async fn test_ingest_auto_creates_source() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");
    let created = ctx.create_project("shop").await;
    let auth = fixtures::bearer(&created.keys.public_key);

    for _ in 0..3 {
        server
            .post(INGEST)
            .add_header("Authorization", &auth)
            .json(&fixtures::sourced_event("signup", "web"))
            .await
            .assert_status(StatusCode::ACCEPTED);
    }

    let sources = list_active_sources(&ctx.store, created.project.id).await.unwrap();
    assert_eq!(sources.len(), 1, "Repeated names must converge on one source");
    assert_eq!(sources[0].name, "web");

    let captured = ctx.queue.captured_events();
    assert_eq!(captured.len(), 3);
    assert!(captured.iter().all(|e| e.event_source_id == Some(sources[0].id)));
}

#[tokio::test]
async fn test_ingest_sampled_out_is_acknowledged_not_queued() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");
    let created = ctx
        .create_project_with(NewProject::new("sampled").with_sampling(0.0, SamplingStrategy::Random))
        .await;

    let response = server
        .post(INGEST)
        .add_header("Authorization", &fixtures::bearer(&created.keys.public_key))
        .json(&fixtures::event("page_view"))
        .await;

    response.assert_status(StatusCode::ACCEPTED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["sampled"], true);
    assert_eq!(ctx.queue.event_count(), 0);
}

#[tokio::test]
async fn test_deterministic_sampling_is_stable_per_user() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");
    let created = ctx
        .create_project_with(
            NewProject::new("deterministic").with_sampling(0.5, SamplingStrategy::Deterministic),
        )
        .await;
    let auth = fixtures::bearer(&created.keys.public_key);

    for user in ["alice", "bob", "carol", "dave"] {
        let mut decisions = Vec::new();
        for _ in 0..5 {
            let response = server
                .post(INGEST)
                .add_header("Authorization", &auth)
                .json(&fixtures::identified_event("click", user, "s"))
                .await;
            response.assert_status(StatusCode::ACCEPTED);
            let body: serde_json::Value = response.json();
            decisions.push(body["sampled"].as_bool().unwrap());
        }
        assert!(
            decisions.iter().all(|d| *d == decisions[0]),
            "Decisions for {} must not vary: {:?}",
            user,
            decisions
        );
    }
}

#[tokio::test]
async fn test_pipeline_persists_explicit_identity() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.stream_router()).expect("Failed to create test server");
    let created = ctx.create_project("pipeline").await;

    server
        .post(INGEST)
        .add_header("Authorization", &fixtures::bearer(&created.keys.public_key))
        .json(&serde_json::json!({
            "event_id": "client-1",
            "event_name": "purchase",
            "event_source": "checkout",
            "user_id": "user-42",
            "session_id": "sess-42",
            "properties": { "amount": 19.99 },
            "timestamp": "2026-03-01T10:15:00Z",
        }))
        .await
        .assert_status(StatusCode::ACCEPTED);

    let stats = ctx.materializer().await.process_events().await.unwrap();
    assert_eq!(stats.total_processed, 1);
    assert_eq!(stats.rejected, 0);
    assert_eq!(stats.pending, 0);

    let page = query_events(
        &ctx.store,
        created.project.id,
        &EventFilter::default(),
        PageRequest { page: 1, page_size: 10 },
    )
    .await
    .unwrap();
    assert_eq!(page.count, 1);
    let stored = &page.results[0];
    assert_eq!(stored.event_id.as_deref(), Some("client-1"));
    assert_eq!(stored.event_name, "purchase");
    assert_eq!(stored.event_source_name.as_deref(), Some("checkout"));
    assert_eq!(stored.user_id, "user-42");
    assert_eq!(stored.session_id, "sess-42");
    assert_eq!(stored.event_properties["amount"], 19.99);
    assert_eq!(stored.event_timestamp.to_rfc3339(), "2026-03-01T10:15:00+00:00");
    assert!(stored.processed_at.is_some());
}

#[tokio::test]
async fn test_pipeline_derives_missing_identity() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.stream_router()).expect("Failed to create test server");
    let created = ctx.create_project("anonymous").await;
    let auth = fixtures::bearer(&created.keys.public_key);

    for _ in 0..2 {
        server
            .post(INGEST)
            .add_header("Authorization", &auth)
            .add_header("User-Agent", fixtures::TEST_USER_AGENT)
            .add_header("X-Real-IP", "198.51.100.20")
            .json(&serde_json::json!({
                "event_name": "page_view",
                "timestamp": "2026-03-01T10:01:00Z",
            }))
            .await
            .assert_status(StatusCode::ACCEPTED);
    }

    ctx.materializer().await.process_events().await.unwrap();

    let page = query_events(
        &ctx.store,
        created.project.id,
        &EventFilter::default(),
        PageRequest { page: 1, page_size: 10 },
    )
    .await
    .unwrap();
    assert_eq!(page.count, 2);

    let first = &page.results[0];
    let second = &page.results[1];
    assert!(first.user_id.starts_with("hash_"));
    assert!(first.session_id.starts_with("sess_"));
    assert_eq!(first.user_id, second.user_id, "Same client maps to the same user");
    assert_eq!(first.session_id, second.session_id, "Same half hour maps to the same session");
    assert_eq!(first.ip_address.as_deref(), Some("198.51.100.20"));
}

#[tokio::test]
async fn test_pipeline_deduplicates_client_event_id() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.stream_router()).expect("Failed to create test server");
    let created = ctx.create_project("dedupe").await;
    let auth = fixtures::bearer(&created.keys.public_key);

    for _ in 0..3 {
        server
            .post(INGEST)
            .add_header("Authorization", &auth)
            .json(&serde_json::json!({ "event_id": "retry-me", "event_name": "submit" }))
            .await
            .assert_status(StatusCode::ACCEPTED);
    }

    let stats = ctx.materializer().await.process_events().await.unwrap();
    assert_eq!(stats.total_processed, 3);
    assert_eq!(stats.pending, 0);
    assert_eq!(count_events(&ctx.store, created.project.id).await.unwrap(), 1);
}
