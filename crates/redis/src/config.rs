//! Redis configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Connection URL, e.g. `redis://localhost:6379/0`
    #[serde(default = "default_url")]
    pub url: String,
    /// Stream holding queued events
    #[serde(default = "default_stream_key")]
    pub stream_key: String,
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    /// Unique per worker process
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,
    /// XREADGROUP block timeout; 0 disables blocking
    #[serde(default = "default_block_ms")]
    pub block_ms: u64,
    /// Pending entries idle longer than this are reclaimed by other consumers
    #[serde(default = "default_claim_idle_ms")]
    pub claim_idle_ms: u64,
}

fn default_url() -> String {
    "redis://localhost:6379/0".to_string()
}

fn default_stream_key() -> String {
    "events:queue".to_string()
}

fn default_consumer_group() -> String {
    "event_processors".to_string()
}

fn default_consumer_name() -> String {
    let suffix = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string()[..8].to_string());
    format!("worker-{}", suffix)
}

fn default_block_ms() -> u64 {
    1000
}

fn default_claim_idle_ms() -> u64 {
    60_000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            stream_key: default_stream_key(),
            consumer_group: default_consumer_group(),
            consumer_name: default_consumer_name(),
            block_ms: default_block_ms(),
            claim_idle_ms: default_claim_idle_ms(),
        }
    }
}

impl RedisConfig {
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_stream_key(mut self, key: impl Into<String>) -> Self {
        self.stream_key = key.into();
        self
    }

    pub fn with_consumer_name(mut self, name: impl Into<String>) -> Self {
        self.consumer_name = name.into();
        self
    }
}
