//! Postgres health checks.

use crate::client::PostgresClient;
use telemetry::health;
use tracing::{debug, warn};

/// Probe Postgres and record the result in the health registry.
pub async fn check_connection(client: &PostgresClient) -> bool {
    match sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(client.pool())
        .await
    {
        Ok(_) => {
            debug!("Postgres connection healthy");
            health().postgres.set_healthy();
            true
        }
        Err(e) => {
            warn!(error = %e, "Postgres health check failed");
            health().postgres.set_unhealthy(e.to_string());
            false
        }
    }
}
