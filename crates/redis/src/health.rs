//! Redis health checks.

use crate::client::{transport_error, RedisClient};
use ingest_core::Result;
use telemetry::health;
use tracing::warn;

/// `PING` the server.
pub async fn ping(client: &RedisClient) -> Result<()> {
    let mut conn = client.connection();
    let pong: String = redis::cmd("PING")
        .query_async(&mut conn)
        .await
        .map_err(|e| transport_error("PING failed", e))?;

    if pong.eq_ignore_ascii_case("PONG") {
        Ok(())
    } else {
        Err(ingest_core::Error::transport(format!("Unexpected PING reply: {}", pong)))
    }
}

/// Probe Redis and record the result in the health registry.
pub async fn check_connection(client: &RedisClient) -> bool {
    match ping(client).await {
        Ok(()) => {
            health().redis.set_healthy();
            true
        }
        Err(e) => {
            warn!(error = %e, "Redis health check failed");
            health().redis.set_unhealthy(e.to_string());
            false
        }
    }
}
