//! Bucket recomputation and upserts.
//!
//! Metrics are always recomputed from raw events and written over the
//! stored row, so rerunning a window converges instead of accumulating.

use crate::client::{db_error, PostgresClient};
use crate::schema::aggregate_table;
use ingest_core::{BucketCounts, BucketWindow, Result};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, FromRow)]
struct BucketCountsRow {
    event_source_id: Option<Uuid>,
    event_name: String,
    event_count: i64,
    unique_users: i64,
    unique_sessions: i64,
}

/// Per (source, event name) metrics for one project within `window`.
pub async fn bucket_counts(
    client: &PostgresClient,
    project_id: Uuid,
    window: &BucketWindow,
) -> Result<Vec<BucketCounts>> {
    let rows = sqlx::query_as::<_, BucketCountsRow>(
        "SELECT event_source_id, event_name, \
                COUNT(*) AS event_count, \
                COUNT(DISTINCT user_id) FILTER (WHERE user_id <> '') AS unique_users, \
                COUNT(DISTINCT session_id) FILTER (WHERE session_id <> '') AS unique_sessions \
         FROM events \
         WHERE project_id = $1 AND event_timestamp >= $2 AND event_timestamp < $3 \
         GROUP BY event_source_id, event_name \
         ORDER BY event_name",
    )
    .bind(project_id)
    .bind(window.start)
    .bind(window.end)
    .fetch_all(client.pool())
    .await
    .map_err(db_error)?;

    Ok(rows
        .into_iter()
        .map(|r| BucketCounts {
            event_source_id: r.event_source_id,
            event_name: r.event_name,
            event_count: r.event_count,
            unique_users: r.unique_users,
            unique_sessions: r.unique_sessions,
        })
        .collect())
}

/// Write one row per group for the window's granularity, replacing any
/// metrics already stored for the same key. Rows whose metrics are
/// unchanged are left untouched and not counted in the returned total.
pub async fn upsert_buckets(
    client: &PostgresClient,
    project_id: Uuid,
    window: &BucketWindow,
    counts: &[BucketCounts],
) -> Result<usize> {
    let table = aggregate_table(window.granularity);
    let sql = format!(
        "INSERT INTO {table} AS t (project_id, event_source_id, event_name, bucket_start, \
         event_count, unique_users, unique_sessions) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         ON CONFLICT (project_id, event_source_id, event_name, bucket_start) DO UPDATE SET \
             event_count = EXCLUDED.event_count, \
             unique_users = EXCLUDED.unique_users, \
             unique_sessions = EXCLUDED.unique_sessions, \
             updated_at = now() \
         WHERE (t.event_count, t.unique_users, t.unique_sessions) IS DISTINCT FROM \
               (EXCLUDED.event_count, EXCLUDED.unique_users, EXCLUDED.unique_sessions)"
    );

    let mut written = 0u64;
    let mut tx = client.pool().begin().await.map_err(db_error)?;
    for group in counts {
        written += sqlx::query(&sql)
            .bind(project_id)
            .bind(group.event_source_id)
            .bind(&group.event_name)
            .bind(window.start)
            .bind(group.event_count)
            .bind(group.unique_users)
            .bind(group.unique_sessions)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?
            .rows_affected();
    }
    tx.commit().await.map_err(db_error)?;

    Ok(written as usize)
}
