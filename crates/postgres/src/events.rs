//! Raw event persistence.

use crate::client::{db_error, PostgresClient};
use ingest_core::{NewEvent, Result};

/// Persist one event and touch its source in a single transaction.
///
/// Returns `false` when the client-supplied `event_id` already exists for
/// the project; the redelivered copy is dropped.
pub async fn insert_event(client: &PostgresClient, event: &NewEvent) -> Result<bool> {
    let mut tx = client.pool().begin().await.map_err(db_error)?;

    let inserted = sqlx::query(
        "INSERT INTO events (id, event_id, project_id, event_source_id, event_name, \
         event_properties, user_id, session_id, ip_address, user_agent, event_timestamp, processed_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, now()) \
         ON CONFLICT (project_id, event_id) WHERE event_id IS NOT NULL DO NOTHING",
    )
    .bind(event.id)
    .bind(&event.event_id)
    .bind(event.project_id)
    .bind(event.event_source_id)
    .bind(&event.event_name)
    .bind(sqlx::types::Json(&event.event_properties))
    .bind(&event.user_id)
    .bind(&event.session_id)
    .bind(&event.ip_address)
    .bind(&event.user_agent)
    .bind(event.timestamp)
    .execute(&mut *tx)
    .await
    .map_err(db_error)?
    .rows_affected()
        > 0;

    if inserted {
        if let Some(source_id) = event.event_source_id {
            sqlx::query(
                "UPDATE event_sources SET last_event_at = now(), updated_at = now() \
                 WHERE id = $1 AND project_id = $2",
            )
            .bind(source_id)
            .bind(event.project_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }
    }

    tx.commit().await.map_err(db_error)?;
    Ok(inserted)
}

/// Raw event count for a project.
pub async fn count_events(client: &PostgresClient, project_id: uuid::Uuid) -> Result<i64> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM events WHERE project_id = $1")
        .bind(project_id)
        .fetch_one(client.pool())
        .await
        .map_err(db_error)
}
