//! Rate limiting through the ingest endpoint.

use api::RateLimitConfig;
use axum::http::StatusCode;
use axum_test::TestServer;
use integration_tests::{fixtures, setup::TestContext};
use postgres_client::sources::create_source;
use postgres_client::{NewProject, NewSource};
use redis::AsyncCommands;

const INGEST: &str = "/api/events/ingest";

#[tokio::test]
async fn test_project_limit_plus_one_is_rejected() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");
    let created = ctx
        .create_project_with(NewProject::new("limited").with_rate_limit(5))
        .await;
    let auth = fixtures::bearer(&created.keys.public_key);

    for _ in 0..5 {
        server
            .post(INGEST)
            .add_header("Authorization", &auth)
            .json(&fixtures::event("page_view"))
            .await
            .assert_status(StatusCode::ACCEPTED);
    }

    let response = server
        .post(INGEST)
        .add_header("Authorization", &auth)
        .json(&fixtures::event("page_view"))
        .await;

    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response
        .header("retry-after")
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));

    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "RATE_001");
    assert_eq!(body["retry_after"], retry_after);
    assert_eq!(ctx.queue.event_count(), 5, "Rejected event must not be queued");
}

#[tokio::test]
async fn test_projects_are_limited_independently() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");
    let noisy = ctx.create_project_with(NewProject::new("noisy").with_rate_limit(2)).await;
    let quiet = ctx.create_project_with(NewProject::new("quiet").with_rate_limit(2)).await;

    for _ in 0..2 {
        server
            .post(INGEST)
            .add_header("Authorization", &fixtures::bearer(&noisy.keys.public_key))
            .json(&fixtures::event("e"))
            .await
            .assert_status(StatusCode::ACCEPTED);
    }
    server
        .post(INGEST)
        .add_header("Authorization", &fixtures::bearer(&noisy.keys.public_key))
        .json(&fixtures::event("e"))
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);

    server
        .post(INGEST)
        .add_header("Authorization", &fixtures::bearer(&quiet.keys.public_key))
        .json(&fixtures::event("e"))
        .await
        .assert_status(StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_ip_limit_applies_across_projects() {
    let ctx = TestContext::with_rate_limit(RateLimitConfig {
        ip_limit_per_minute: 3,
        ..Default::default()
    })
    .await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");
    let first = ctx.create_project("first").await;
    let second = ctx.create_project("second").await;

    for key in [&first.keys.public_key, &second.keys.public_key, &first.keys.public_key] {
        server
            .post(INGEST)
            .add_header("Authorization", &fixtures::bearer(key))
            .add_header("X-Forwarded-For", "192.0.2.10")
            .json(&fixtures::event("e"))
            .await
            .assert_status(StatusCode::ACCEPTED);
    }

    server
        .post(INGEST)
        .add_header("Authorization", &fixtures::bearer(&second.keys.public_key))
        .add_header("X-Forwarded-For", "192.0.2.10")
        .json(&fixtures::event("e"))
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);

    // Another client address still gets through
    server
        .post(INGEST)
        .add_header("Authorization", &fixtures::bearer(&second.keys.public_key))
        .add_header("X-Forwarded-For", "192.0.2.11")
        .json(&fixtures::event("e"))
        .await
        .assert_status(StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_source_override_limits_only_that_source() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");
    let created = ctx.create_project("sources").await;
    create_source(
        &ctx.store,
        created.project.id,
        &NewSource {
            rate_limit_per_minute: Some(1),
            ..NewSource::new("batch-import")
        },
    )
    .await
    .unwrap();
    let auth = fixtures::bearer(&created.keys.public_key);

    server
        .post(INGEST)
        .add_header("Authorization", &auth)
        .json(&fixtures::sourced_event("row", "batch-import"))
        .await
        .assert_status(StatusCode::ACCEPTED);
    server
        .post(INGEST)
        .add_header("Authorization", &auth)
        .json(&fixtures::sourced_event("row", "batch-import"))
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);

    // Other sources fall back to the project limit
    server
        .post(INGEST)
        .add_header("Authorization", &auth)
        .json(&fixtures::sourced_event("click", "web"))
        .await
        .assert_status(StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_redis_window_store_enforces_limit() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.stream_router()).expect("Failed to create test server");
    let created = ctx
        .create_project_with(NewProject::new("redis-limited").with_rate_limit(3))
        .await;
    let auth = fixtures::bearer(&created.keys.public_key);

    for _ in 0..3 {
        server
            .post(INGEST)
            .add_header("Authorization", &auth)
            .json(&fixtures::event("e"))
            .await
            .assert_status(StatusCode::ACCEPTED);
    }

    let response = server
        .post(INGEST)
        .add_header("Authorization", &auth)
        .json(&fixtures::event("e"))
        .await;
    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert!(!response.header("retry-after").is_empty());

    // Window keys expire shortly after the window closes
    let key = format!("rate_limit:project:{}", created.project.id);
    let mut conn = ctx.redis.connection();
    let ttl: i64 = conn.ttl(&key).await.unwrap();
    assert!((61..=70).contains(&ttl), "ttl {ttl}");
}
