//! Shared Redis connection.

use crate::config::RedisConfig;
use ingest_core::{Error, Result};
use redis::aio::ConnectionManager;
use tracing::info;

/// Map a Redis failure into the transport error class.
pub(crate) fn transport_error(context: &str, e: redis::RedisError) -> Error {
    Error::transport(format!("{}: {}", context, e))
}

/// Cloneable handle over a reconnecting connection.
#[derive(Clone)]
pub struct RedisClient {
    conn: ConnectionManager,
    config: RedisConfig,
}

impl RedisClient {
    pub async fn connect(config: RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| transport_error("Invalid Redis URL", e))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| transport_error("Failed to connect to Redis", e))?;

        info!(
            stream = %config.stream_key,
            group = %config.consumer_group,
            "Connected to Redis"
        );

        Ok(Self { conn, config })
    }

    /// A connection handle for issuing commands.
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }
}
