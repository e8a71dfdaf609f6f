//! Raw event deletion. Aggregate tables are never touched here.

use crate::client::{db_error, PostgresClient};
use chrono::{DateTime, Utc};
use ingest_core::Result;
use uuid::Uuid;

pub async fn count_events_before(
    client: &PostgresClient,
    project_id: Uuid,
    cutoff: DateTime<Utc>,
) -> Result<u64> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM events WHERE project_id = $1 AND event_timestamp < $2",
    )
    .bind(project_id)
    .bind(cutoff)
    .fetch_one(client.pool())
    .await
    .map_err(db_error)?;
    Ok(count.max(0) as u64)
}

pub async fn delete_events_before(
    client: &PostgresClient,
    project_id: Uuid,
    cutoff: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query("DELETE FROM events WHERE project_id = $1 AND event_timestamp < $2")
        .bind(project_id)
        .bind(cutoff)
        .execute(client.pool())
        .await
        .map_err(db_error)?;
    Ok(result.rows_affected())
}
