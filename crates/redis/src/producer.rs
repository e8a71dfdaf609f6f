//! Stream producer.

use crate::client::{transport_error, RedisClient};
use async_trait::async_trait;
use chrono::Utc;
use ingest_core::{Error, QueuedEvent, Result};
use redis::AsyncCommands;
use std::time::Instant;
use telemetry::metrics;
use tracing::{debug, error};

/// Stream field holding the JSON payload.
pub const FIELD_EVENT_DATA: &str = "event_data";
/// Stream field holding the enqueue time.
pub const FIELD_QUEUED_AT: &str = "queued_at";

/// Write side of the event stream.
///
/// Implemented by [`StreamProducer`] in production and by capturing mocks
/// in tests.
#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Append one event; returns the stream entry id.
    async fn enqueue(&self, event: &QueuedEvent) -> Result<String>;

    /// Whether the queue currently accepts writes.
    async fn is_healthy(&self) -> bool;

    /// Entries currently held in the stream.
    async fn stream_length(&self) -> Result<u64>;
}

/// Appends events to the Redis stream with `XADD`.
#[derive(Clone)]
pub struct StreamProducer {
    client: RedisClient,
}

impl StreamProducer {
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventQueue for StreamProducer {
    async fn enqueue(&self, event: &QueuedEvent) -> Result<String> {
        let start = Instant::now();
        let payload = serde_json::to_string(event)?;
        let queued_at = Utc::now().to_rfc3339();
        let stream_key = &self.client.config().stream_key;

        let mut conn = self.client.connection();
        let result: redis::RedisResult<String> = conn
            .xadd(
                stream_key,
                "*",
                &[(FIELD_EVENT_DATA, payload.as_str()), (FIELD_QUEUED_AT, queued_at.as_str())],
            )
            .await;

        match result {
            Ok(entry_id) => {
                metrics().events_queued.inc();
                debug!(
                    entry_id = %entry_id,
                    project_id = %event.project_id,
                    event_name = %event.event_name,
                    latency_ms = start.elapsed().as_millis() as u64,
                    "Event queued"
                );
                Ok(entry_id)
            }
            Err(e) => {
                metrics().queue_errors.inc();
                error!(error = %e, project_id = %event.project_id, "Failed to queue event");
                Err(Error::queueing(transport_error("XADD failed", e).to_string()))
            }
        }
    }

    async fn is_healthy(&self) -> bool {
        crate::health::check_connection(&self.client).await
    }

    async fn stream_length(&self) -> Result<u64> {
        crate::consumer::stream_length(&self.client).await
    }
}
