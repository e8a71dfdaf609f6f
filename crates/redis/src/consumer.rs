//! Consumer-group reads over the event stream.
//!
//! Entries are delivered at least once. An entry stays in the group's
//! pending list until [`StreamConsumer::ack`] is called for it; entries
//! left pending by a crashed or failing consumer are taken over with
//! [`StreamConsumer::claim_stale`] once idle for `claim_idle_ms`.

use crate::client::{transport_error, RedisClient};
use crate::config::RedisConfig;
use crate::producer::{FIELD_EVENT_DATA, FIELD_QUEUED_AT};
use ingest_core::{Error, QueuedEvent, Result};
use redis::streams::{
    StreamId, StreamPendingReply, StreamRangeReply, StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;
use tracing::{debug, info};

/// One stream entry as read from the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub event_data: Option<String>,
    pub queued_at: Option<String>,
}

impl StreamEntry {
    fn from_stream_id(entry: &StreamId) -> Self {
        Self {
            id: entry.id.clone(),
            event_data: entry.get(FIELD_EVENT_DATA),
            queued_at: entry.get(FIELD_QUEUED_AT),
        }
    }

    /// Decode the payload. Failures are permanent for this entry.
    pub fn decode(&self) -> Result<QueuedEvent> {
        let data = self
            .event_data
            .as_deref()
            .ok_or_else(|| Error::processing(format!("Entry {} has no event_data", self.id)))?;
        serde_json::from_str(data)
            .map_err(|e| Error::processing(format!("Entry {} is malformed: {}", self.id, e)))
    }
}

/// Reader bound to one (group, consumer) identity.
#[derive(Clone)]
pub struct StreamConsumer {
    client: RedisClient,
}

impl StreamConsumer {
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }

    fn config(&self) -> &RedisConfig {
        self.client.config()
    }

    pub fn consumer_name(&self) -> &str {
        &self.config().consumer_name
    }

    /// Create the group at the start of the stream. An existing group is left as is.
    pub async fn ensure_group(&self) -> Result<()> {
        let config = self.config();
        let mut conn = self.client.connection();
        let created: redis::RedisResult<String> = conn
            .xgroup_create_mkstream(&config.stream_key, &config.consumer_group, "0")
            .await;

        match created {
            Ok(_) => {
                info!(
                    stream = %config.stream_key,
                    group = %config.consumer_group,
                    "Created consumer group"
                );
                Ok(())
            }
            Err(e) if is_busy_group(&e) => {
                debug!(group = %config.consumer_group, "Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(transport_error("XGROUP CREATE failed", e)),
        }
    }

    /// Read up to `count` never-delivered entries, blocking up to `block_ms`.
    /// A timeout yields an empty batch.
    pub async fn read_new(&self, count: usize) -> Result<Vec<StreamEntry>> {
        let config = self.config();
        let mut opts = StreamReadOptions::default()
            .group(&config.consumer_group, &config.consumer_name)
            .count(count);
        if config.block_ms > 0 {
            opts = opts.block(config.block_ms as usize);
        }

        let mut conn = self.client.connection();
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&config.stream_key], &[">"], &opts)
            .await
            .map_err(|e| transport_error("XREADGROUP failed", e))?;

        Ok(reply
            .map(|r| {
                r.keys
                    .iter()
                    .flat_map(|key| key.ids.iter().map(StreamEntry::from_stream_id))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Take over up to `count` entries pending on other consumers for longer
    /// than `claim_idle_ms`.
    pub async fn claim_stale(&self, count: usize) -> Result<Vec<StreamEntry>> {
        let config = self.config();
        let mut conn = self.client.connection();
        let reply: Vec<redis::Value> = redis::cmd("XAUTOCLAIM")
            .arg(&config.stream_key)
            .arg(&config.consumer_group)
            .arg(&config.consumer_name)
            .arg(config.claim_idle_ms)
            .arg("0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(|e| transport_error("XAUTOCLAIM failed", e))?;

        let Some(entries) = reply.get(1) else {
            return Ok(Vec::new());
        };
        let range: StreamRangeReply = redis::from_redis_value(entries)
            .map_err(|e| transport_error("Unexpected XAUTOCLAIM reply", e))?;

        let claimed: Vec<StreamEntry> = range.ids.iter().map(StreamEntry::from_stream_id).collect();
        if !claimed.is_empty() {
            info!(
                consumer = %config.consumer_name,
                count = claimed.len(),
                "Claimed stale pending entries"
            );
        }
        Ok(claimed)
    }

    /// Acknowledge processed entries; returns how many were still pending.
    pub async fn ack(&self, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let config = self.config();
        let mut conn = self.client.connection();
        let acked: u64 = conn
            .xack(&config.stream_key, &config.consumer_group, ids)
            .await
            .map_err(|e| transport_error("XACK failed", e))?;
        Ok(acked)
    }

    /// Entries delivered to the group but not yet acknowledged.
    pub async fn pending_count(&self) -> Result<u64> {
        let config = self.config();
        let mut conn = self.client.connection();
        let reply: StreamPendingReply = conn
            .xpending(&config.stream_key, &config.consumer_group)
            .await
            .map_err(|e| transport_error("XPENDING failed", e))?;
        Ok(reply.count() as u64)
    }

    pub async fn len(&self) -> Result<u64> {
        stream_length(&self.client).await
    }
}

/// `XLEN` of the event stream.
pub async fn stream_length(client: &RedisClient) -> Result<u64> {
    let mut conn = client.connection();
    let len: u64 = conn
        .xlen(&client.config().stream_key)
        .await
        .map_err(|e| transport_error("XLEN failed", e))?;
    Ok(len)
}

fn is_busy_group(e: &redis::RedisError) -> bool {
    e.code() == Some("BUSYGROUP") || e.to_string().contains("BUSYGROUP")
}
