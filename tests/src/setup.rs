//! Test context wiring containers, clients and the router together.

use crate::containers::{retry_until_ready, TestContainers};
use crate::mocks::MockQueue;
use api::{router, AppState, InMemoryWindowStore, RateLimitConfig};
use axum::Router;
use postgres_client::projects::create_project;
use postgres_client::{init_schema, CreatedProject, NewProject, PostgresClient, PostgresConfig};
use redis_client::{RedisClient, RedisConfig, StreamConsumer, StreamProducer};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use worker::Materializer;

const READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything an integration test needs.
///
/// The default router queues into a [`MockQueue`] and rate limits against
/// an in-memory window. [`TestContext::stream_router`] swaps in the real
/// Redis stream for end-to-end runs.
pub struct TestContext {
    pub containers: TestContainers,
    pub store: PostgresClient,
    pub redis: RedisClient,
    pub queue: Arc<MockQueue>,
    pub router: Router,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_rate_limit(RateLimitConfig::default()).await
    }

    pub async fn with_rate_limit(rate_limit: RateLimitConfig) -> Self {
        init_test_tracing();

        let containers = TestContainers::start().await;

        let pg_config = PostgresConfig::default().with_url(containers.database_url.clone());
        let store = retry_until_ready("Postgres", READY_TIMEOUT, || PostgresClient::connect(&pg_config)).await;
        init_schema(&store).await.expect("Failed to initialise schema");

        // Unique stream per context so runs against a shared server stay apart
        let mut redis_config = RedisConfig::default()
            .with_url(containers.redis_url.clone())
            .with_stream_key(format!("events:test:{}", Uuid::new_v4().simple()))
            .with_consumer_name("test-worker");
        redis_config.block_ms = 0;
        let redis = retry_until_ready("Redis", READY_TIMEOUT, || RedisClient::connect(redis_config.clone())).await;

        let queue = Arc::new(MockQueue::new());
        let state = AppState::with_rate_limit(
            queue.clone(),
            store.clone(),
            Arc::new(InMemoryWindowStore::new()),
            rate_limit,
        );

        Self {
            containers,
            store,
            redis,
            queue,
            router: router(state),
        }
    }

    /// Router that writes to the real stream and limits through Redis.
    pub fn stream_router(&self) -> Router {
        let state = AppState::new(
            Arc::new(StreamProducer::new(self.redis.clone())),
            self.store.clone(),
            Arc::new(self.redis.clone()),
        );
        router(state)
    }

    /// Materializer reading this context's stream.
    pub async fn materializer(&self) -> Materializer {
        let consumer = StreamConsumer::new(self.redis.clone());
        consumer.ensure_group().await.expect("Failed to create consumer group");
        Materializer::new(consumer, self.store.clone())
    }

    /// Create an active project with default settings.
    pub async fn create_project(&self, name: &str) -> CreatedProject {
        self.create_project_with(NewProject::new(name)).await
    }

    pub async fn create_project_with(&self, new: NewProject) -> CreatedProject {
        create_project(&self.store, &new)
            .await
            .expect("Failed to create project")
    }
}

/// Set `INGEST_TEST_LOG` to see service logs while debugging a test.
fn init_test_tracing() {
    if let Ok(filter) = std::env::var("INGEST_TEST_LOG") {
        telemetry::init_tracing(telemetry::TracingConfig::default().with_filter(filter));
    }
}
