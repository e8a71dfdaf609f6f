//! Per-project daily summaries.

use crate::client::{db_error, PostgresClient};
use chrono::NaiveDate;
use ingest_core::{rank_top_events, source_breakdown, BucketWindow, DailySummary, Result, TopEvent};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, FromRow)]
struct TotalsRow {
    total_events: i64,
    unique_users: i64,
    unique_sessions: i64,
    unique_event_names: i64,
}

#[derive(Debug, FromRow)]
struct NameCountRow {
    event_name: String,
    event_count: i64,
    unique_users: i64,
}

#[derive(Debug, FromRow)]
struct SourceCountRow {
    source_name: Option<String>,
    event_count: i64,
}

/// Recompute the summary for `date` from raw events. Returns `None` when the
/// project had no events that day.
pub async fn compute_daily_summary(
    client: &PostgresClient,
    project_id: Uuid,
    date: NaiveDate,
) -> Result<Option<DailySummary>> {
    let window = BucketWindow::for_date(date);

    let totals = sqlx::query_as::<_, TotalsRow>(
        "SELECT COUNT(*) AS total_events, \
                COUNT(DISTINCT user_id) FILTER (WHERE user_id <> '') AS unique_users, \
                COUNT(DISTINCT session_id) FILTER (WHERE session_id <> '') AS unique_sessions, \
                COUNT(DISTINCT event_name) AS unique_event_names \
         FROM events \
         WHERE project_id = $1 AND event_timestamp >= $2 AND event_timestamp < $3",
    )
    .bind(project_id)
    .bind(window.start)
    .bind(window.end)
    .fetch_one(client.pool())
    .await
    .map_err(db_error)?;

    if totals.total_events == 0 {
        return Ok(None);
    }

    let names = sqlx::query_as::<_, NameCountRow>(
        "SELECT event_name, COUNT(*) AS event_count, \
                COUNT(DISTINCT user_id) FILTER (WHERE user_id <> '') AS unique_users \
         FROM events \
         WHERE project_id = $1 AND event_timestamp >= $2 AND event_timestamp < $3 \
         GROUP BY event_name",
    )
    .bind(project_id)
    .bind(window.start)
    .bind(window.end)
    .fetch_all(client.pool())
    .await
    .map_err(db_error)?;

    let sources = sqlx::query_as::<_, SourceCountRow>(
        "SELECT s.name AS source_name, COUNT(*) AS event_count \
         FROM events e LEFT JOIN event_sources s ON s.id = e.event_source_id \
         WHERE e.project_id = $1 AND e.event_timestamp >= $2 AND e.event_timestamp < $3 \
         GROUP BY s.name",
    )
    .bind(project_id)
    .bind(window.start)
    .bind(window.end)
    .fetch_all(client.pool())
    .await
    .map_err(db_error)?;

    let top_events = rank_top_events(
        names
            .into_iter()
            .map(|r| TopEvent {
                event_name: r.event_name,
                event_count: r.event_count,
                unique_users: r.unique_users,
            })
            .collect(),
    );

    Ok(Some(DailySummary {
        project_id,
        date,
        total_events: totals.total_events,
        unique_users: totals.unique_users,
        unique_sessions: totals.unique_sessions,
        unique_event_names: totals.unique_event_names,
        top_events,
        source_breakdown: source_breakdown(sources.into_iter().map(|r| (r.source_name, r.event_count))),
    }))
}

/// Store the summary, overwriting any previous value for the same day.
pub async fn upsert_daily_summary(client: &PostgresClient, summary: &DailySummary) -> Result<()> {
    sqlx::query(
        "INSERT INTO project_daily_summaries AS t (project_id, date, total_events, unique_users, \
         unique_sessions, unique_event_names, top_events, source_breakdown) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         ON CONFLICT (project_id, date) DO UPDATE SET \
             total_events = EXCLUDED.total_events, \
             unique_users = EXCLUDED.unique_users, \
             unique_sessions = EXCLUDED.unique_sessions, \
             unique_event_names = EXCLUDED.unique_event_names, \
             top_events = EXCLUDED.top_events, \
             source_breakdown = EXCLUDED.source_breakdown, \
             updated_at = now() \
         WHERE (t.total_events, t.unique_users, t.unique_sessions, t.unique_event_names, \
                t.top_events, t.source_breakdown) IS DISTINCT FROM \
               (EXCLUDED.total_events, EXCLUDED.unique_users, EXCLUDED.unique_sessions, \
                EXCLUDED.unique_event_names, EXCLUDED.top_events, EXCLUDED.source_breakdown)",
    )
    .bind(summary.project_id)
    .bind(summary.date)
    .bind(summary.total_events)
    .bind(summary.unique_users)
    .bind(summary.unique_sessions)
    .bind(summary.unique_event_names)
    .bind(Json(&summary.top_events))
    .bind(Json(&summary.source_breakdown))
    .execute(client.pool())
    .await
    .map_err(db_error)?;
    Ok(())
}
