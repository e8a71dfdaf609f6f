//! Read queries behind the dashboard endpoints.
//!
//! Every query is scoped by `project_id`; nothing here can return another
//! tenant's rows.

use crate::client::{db_error, PostgresClient};
use crate::schema::aggregate_table;
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use ingest_core::limits::{ACTIVE_SESSION_WINDOW_MINUTES, EVENT_NAMES_LOOKBACK_DAYS, TOP_EVENTS_LIMIT};
use ingest_core::{AggregateBucket, DailySummary, Granularity, Result, TopEvent};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::{FromRow, Postgres, QueryBuilder};
use std::collections::BTreeMap;
use uuid::Uuid;

/// 1-based page selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    fn limit(&self) -> i64 {
        self.page_size as i64
    }

    fn offset(&self) -> i64 {
        (self.page.max(1) as i64 - 1) * self.page_size as i64
    }
}

/// One page of results plus the total across all pages.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub count: i64,
    pub results: Vec<T>,
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub start: Option<DateTime<Utc>>,
    /// Inclusive
    pub end: Option<DateTime<Utc>>,
    pub event_name: Option<String>,
    pub event_source_id: Option<Uuid>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct StoredEvent {
    pub id: Uuid,
    pub event_id: Option<String>,
    pub event_name: String,
    pub event_source_id: Option<Uuid>,
    pub event_source_name: Option<String>,
    pub event_properties: serde_json::Value,
    pub user_id: String,
    pub session_id: String,
    pub ip_address: Option<String>,
    pub user_agent: String,
    #[serde(rename = "timestamp")]
    pub event_timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

fn push_event_filters(qb: &mut QueryBuilder<'_, Postgres>, project_id: Uuid, filter: &EventFilter) {
    qb.push(" WHERE e.project_id = ").push_bind(project_id);
    if let Some(start) = filter.start {
        qb.push(" AND e.event_timestamp >= ").push_bind(start);
    }
    if let Some(end) = filter.end {
        qb.push(" AND e.event_timestamp <= ").push_bind(end);
    }
    if let Some(name) = &filter.event_name {
        qb.push(" AND e.event_name = ").push_bind(name.clone());
    }
    if let Some(source_id) = filter.event_source_id {
        qb.push(" AND e.event_source_id = ").push_bind(source_id);
    }
    if let Some(user_id) = &filter.user_id {
        qb.push(" AND e.user_id = ").push_bind(user_id.clone());
    }
}

/// Raw events, newest first.
pub async fn query_events(
    client: &PostgresClient,
    project_id: Uuid,
    filter: &EventFilter,
    page: PageRequest,
) -> Result<Page<StoredEvent>> {
    let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM events e");
    push_event_filters(&mut count_qb, project_id, filter);
    let count = count_qb
        .build_query_scalar::<i64>()
        .fetch_one(client.pool())
        .await
        .map_err(db_error)?;

    let mut qb = QueryBuilder::new(
        "SELECT e.id, e.event_id, e.event_name, e.event_source_id, s.name AS event_source_name, \
         e.event_properties, e.user_id, e.session_id, e.ip_address, e.user_agent, \
         e.event_timestamp, e.created_at, e.processed_at \
         FROM events e LEFT JOIN event_sources s ON s.id = e.event_source_id",
    );
    push_event_filters(&mut qb, project_id, filter);
    qb.push(" ORDER BY e.event_timestamp DESC, e.id LIMIT ")
        .push_bind(page.limit())
        .push(" OFFSET ")
        .push_bind(page.offset());

    let results = qb
        .build_query_as::<StoredEvent>()
        .fetch_all(client.pool())
        .await
        .map_err(db_error)?;

    Ok(Page { count, results })
}

#[derive(Debug, Clone, Default)]
pub struct AggregateFilter {
    pub start: Option<DateTime<Utc>>,
    /// Inclusive
    pub end: Option<DateTime<Utc>>,
    pub event_name: Option<String>,
}

#[derive(Debug, FromRow)]
struct AggregateRow {
    id: Uuid,
    project_id: Uuid,
    event_source_id: Option<Uuid>,
    event_source_name: Option<String>,
    bucket_start: DateTime<Utc>,
    event_name: String,
    event_count: i64,
    unique_users: i64,
    unique_sessions: i64,
    updated_at: DateTime<Utc>,
}

fn push_aggregate_filters(qb: &mut QueryBuilder<'_, Postgres>, project_id: Uuid, filter: &AggregateFilter) {
    qb.push(" WHERE a.project_id = ").push_bind(project_id);
    if let Some(start) = filter.start {
        qb.push(" AND a.bucket_start >= ").push_bind(start);
    }
    if let Some(end) = filter.end {
        qb.push(" AND a.bucket_start <= ").push_bind(end);
    }
    if let Some(name) = &filter.event_name {
        qb.push(" AND a.event_name = ").push_bind(name.clone());
    }
}

/// Aggregate rows of one granularity, newest bucket first then highest count.
pub async fn list_aggregates(
    client: &PostgresClient,
    project_id: Uuid,
    granularity: Granularity,
    filter: &AggregateFilter,
    page: PageRequest,
) -> Result<Page<AggregateBucket>> {
    let table = aggregate_table(granularity);

    let mut count_qb = QueryBuilder::new(format!("SELECT COUNT(*) FROM {table} a"));
    push_aggregate_filters(&mut count_qb, project_id, filter);
    let count = count_qb
        .build_query_scalar::<i64>()
        .fetch_one(client.pool())
        .await
        .map_err(db_error)?;

    let mut qb = QueryBuilder::new(format!(
        "SELECT a.id, a.project_id, a.event_source_id, s.name AS event_source_name, a.bucket_start, \
         a.event_name, a.event_count, a.unique_users, a.unique_sessions, a.updated_at \
         FROM {table} a LEFT JOIN event_sources s ON s.id = a.event_source_id"
    ));
    push_aggregate_filters(&mut qb, project_id, filter);
    qb.push(" ORDER BY a.bucket_start DESC, a.event_count DESC, a.event_name LIMIT ")
        .push_bind(page.limit())
        .push(" OFFSET ")
        .push_bind(page.offset());

    let rows = qb
        .build_query_as::<AggregateRow>()
        .fetch_all(client.pool())
        .await
        .map_err(db_error)?;

    let results = rows
        .into_iter()
        .map(|r| AggregateBucket {
            id: r.id,
            project_id: r.project_id,
            event_source_id: r.event_source_id,
            event_source_name: r.event_source_name,
            granularity,
            bucket_start: r.bucket_start,
            event_name: r.event_name,
            event_count: r.event_count,
            unique_users: r.unique_users,
            unique_sessions: r.unique_sessions,
            updated_at: r.updated_at,
        })
        .collect();

    Ok(Page { count, results })
}

#[derive(Debug, FromRow)]
struct SummaryRow {
    project_id: Uuid,
    date: NaiveDate,
    total_events: i64,
    unique_users: i64,
    unique_sessions: i64,
    unique_event_names: i64,
    top_events: Json<Vec<TopEvent>>,
    source_breakdown: Json<BTreeMap<String, i64>>,
}

impl From<SummaryRow> for DailySummary {
    fn from(row: SummaryRow) -> Self {
        DailySummary {
            project_id: row.project_id,
            date: row.date,
            total_events: row.total_events,
            unique_users: row.unique_users,
            unique_sessions: row.unique_sessions,
            unique_event_names: row.unique_event_names,
            top_events: row.top_events.0,
            source_breakdown: row.source_breakdown.0,
        }
    }
}

fn push_summary_filters(
    qb: &mut QueryBuilder<'_, Postgres>,
    project_id: Uuid,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) {
    qb.push(" WHERE project_id = ").push_bind(project_id);
    if let Some(start) = start {
        qb.push(" AND date >= ").push_bind(start);
    }
    if let Some(end) = end {
        qb.push(" AND date <= ").push_bind(end);
    }
}

/// Daily summaries in `[start, end]`, newest first.
pub async fn list_summaries(
    client: &PostgresClient,
    project_id: Uuid,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    page: PageRequest,
) -> Result<Page<DailySummary>> {
    let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM project_daily_summaries");
    push_summary_filters(&mut count_qb, project_id, start, end);
    let count = count_qb
        .build_query_scalar::<i64>()
        .fetch_one(client.pool())
        .await
        .map_err(db_error)?;

    let mut qb = QueryBuilder::new(
        "SELECT project_id, date, total_events, unique_users, unique_sessions, unique_event_names, \
         top_events, source_breakdown FROM project_daily_summaries",
    );
    push_summary_filters(&mut qb, project_id, start, end);
    qb.push(" ORDER BY date DESC LIMIT ")
        .push_bind(page.limit())
        .push(" OFFSET ")
        .push_bind(page.offset());

    let rows = qb
        .build_query_as::<SummaryRow>()
        .fetch_all(client.pool())
        .await
        .map_err(db_error)?;

    Ok(Page {
        count,
        results: rows.into_iter().map(DailySummary::from).collect(),
    })
}

/// Active source as listed on the dashboard.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SourceSummary {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub last_event_at: Option<DateTime<Utc>>,
}

pub async fn list_source_summaries(client: &PostgresClient, project_id: Uuid) -> Result<Vec<SourceSummary>> {
    sqlx::query_as::<_, SourceSummary>(
        "SELECT id, name, description, last_event_at FROM event_sources \
         WHERE project_id = $1 AND is_active ORDER BY name",
    )
    .bind(project_id)
    .fetch_all(client.pool())
    .await
    .map_err(db_error)
}

/// Distinct event names seen in the lookback window, sorted.
pub async fn list_event_names(
    client: &PostgresClient,
    project_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<String>> {
    sqlx::query_scalar::<_, String>(
        "SELECT DISTINCT event_name FROM events \
         WHERE project_id = $1 AND event_timestamp >= $2 ORDER BY event_name",
    )
    .bind(project_id)
    .bind(now - TimeDelta::days(EVENT_NAMES_LOOKBACK_DAYS))
    .fetch_all(client.pool())
    .await
    .map_err(db_error)
}

#[derive(Debug, Clone, Serialize)]
pub struct RealtimeMetrics {
    pub project_name: String,
    pub current_hour_events: i64,
    pub current_day_events: i64,
    pub last_24h_events: i64,
    pub active_users_today: i64,
    pub active_sessions_now: i64,
    pub top_events_today: Vec<(String, i64)>,
    pub event_sources: Vec<SourceSummary>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct RealtimeCountsRow {
    current_hour_events: i64,
    current_day_events: i64,
    last_24h_events: i64,
    active_users_today: i64,
    active_sessions_now: i64,
}

/// Snapshot of recent activity relative to `now`.
pub async fn realtime_metrics(
    client: &PostgresClient,
    project_id: Uuid,
    project_name: &str,
    now: DateTime<Utc>,
) -> Result<RealtimeMetrics> {
    let hour_start = Granularity::Hourly.floor(now);
    let day_start = Granularity::Daily.floor(now);
    let day_ago = now - TimeDelta::hours(24);
    let session_cutoff = now - TimeDelta::minutes(ACTIVE_SESSION_WINDOW_MINUTES);

    let counts = sqlx::query_as::<_, RealtimeCountsRow>(
        "SELECT \
            COUNT(*) FILTER (WHERE event_timestamp >= $2) AS current_hour_events, \
            COUNT(*) FILTER (WHERE event_timestamp >= $3) AS current_day_events, \
            COUNT(*) AS last_24h_events, \
            COUNT(DISTINCT user_id) FILTER (WHERE event_timestamp >= $3 AND user_id <> '') AS active_users_today, \
            COUNT(DISTINCT session_id) FILTER (WHERE event_timestamp >= $5 AND session_id <> '') AS active_sessions_now \
         FROM events WHERE project_id = $1 AND event_timestamp >= $4",
    )
    .bind(project_id)
    .bind(hour_start)
    .bind(day_start)
    .bind(day_ago)
    .bind(session_cutoff)
    .fetch_one(client.pool())
    .await
    .map_err(db_error)?;

    let top_events_today = sqlx::query_as::<_, (String, i64)>(
        "SELECT event_name, COUNT(*) AS event_count FROM events \
         WHERE project_id = $1 AND event_timestamp >= $2 \
         GROUP BY event_name ORDER BY event_count DESC, event_name LIMIT $3",
    )
    .bind(project_id)
    .bind(day_start)
    .bind(TOP_EVENTS_LIMIT as i64)
    .fetch_all(client.pool())
    .await
    .map_err(db_error)?;

    Ok(RealtimeMetrics {
        project_name: project_name.to_string(),
        current_hour_events: counts.current_hour_events,
        current_day_events: counts.current_day_events,
        last_24h_events: counts.last_24h_events,
        active_users_today: counts.active_users_today,
        active_sessions_now: counts.active_sessions_now,
        top_events_today,
        event_sources: list_source_summaries(client, project_id).await?,
        last_updated: now,
    })
}

/// Raw event totals per project, for the `status` command.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ProjectEventCount {
    pub project_id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub event_count: i64,
}

pub async fn project_event_counts(client: &PostgresClient) -> Result<Vec<ProjectEventCount>> {
    sqlx::query_as::<_, ProjectEventCount>(
        "SELECT p.id AS project_id, p.name, p.is_active, COUNT(e.id) AS event_count \
         FROM projects p LEFT JOIN events e ON e.project_id = p.id \
         GROUP BY p.id, p.name, p.is_active ORDER BY p.name",
    )
    .fetch_all(client.pool())
    .await
    .map_err(db_error)
}
