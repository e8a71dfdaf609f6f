//! Event sources.

use crate::client::{db_error, PostgresClient};
use chrono::{DateTime, Utc};
use ingest_core::{EventSource, Result, SamplingStrategy};
use sqlx::FromRow;
use tracing::debug;
use uuid::Uuid;

const SOURCE_COLUMNS: &str = "id, project_id, name, description, is_active, \
    rate_limit_per_minute, sampling_enabled, sampling_rate, sampling_strategy, \
    last_event_at, created_at";

#[derive(Debug, Clone, FromRow)]
struct SourceRow {
    id: Uuid,
    project_id: Uuid,
    name: String,
    description: String,
    is_active: bool,
    rate_limit_per_minute: Option<i32>,
    sampling_enabled: Option<bool>,
    sampling_rate: Option<f64>,
    sampling_strategy: Option<String>,
    last_event_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<SourceRow> for EventSource {
    fn from(row: SourceRow) -> Self {
        EventSource {
            id: row.id,
            project_id: row.project_id,
            name: row.name,
            description: row.description,
            is_active: row.is_active,
            rate_limit_per_minute: row.rate_limit_per_minute.map(|v| v.max(1) as u32),
            sampling_enabled: row.sampling_enabled,
            sampling_rate: row.sampling_rate,
            sampling_strategy: row.sampling_strategy.as_deref().map(SamplingStrategy::parse),
            last_event_at: row.last_event_at,
            created_at: row.created_at,
        }
    }
}

/// Explicitly configured source. `None` overrides inherit the project value.
#[derive(Debug, Clone, Default)]
pub struct NewSource {
    pub name: String,
    pub description: String,
    pub rate_limit_per_minute: Option<u32>,
    pub sampling_enabled: Option<bool>,
    pub sampling_rate: Option<f64>,
    pub sampling_strategy: Option<SamplingStrategy>,
}

impl NewSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

pub async fn create_source(
    client: &PostgresClient,
    project_id: Uuid,
    new: &NewSource,
) -> Result<EventSource> {
    let sql = format!(
        "INSERT INTO event_sources (id, project_id, name, description, rate_limit_per_minute, \
         sampling_enabled, sampling_rate, sampling_strategy) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {SOURCE_COLUMNS}"
    );
    let row = sqlx::query_as::<_, SourceRow>(&sql)
        .bind(Uuid::new_v4())
        .bind(project_id)
        .bind(&new.name)
        .bind(&new.description)
        .bind(new.rate_limit_per_minute.map(|v| v as i32))
        .bind(new.sampling_enabled)
        .bind(new.sampling_rate)
        .bind(new.sampling_strategy.map(|s| s.as_str()))
        .fetch_one(client.pool())
        .await
        .map_err(db_error)?;
    Ok(row.into())
}

/// Fetch the named source, creating it on first use.
///
/// Concurrent first events for the same name converge on one row.
pub async fn get_or_create_source(
    client: &PostgresClient,
    project_id: Uuid,
    name: &str,
) -> Result<EventSource> {
    let sql = format!(
        "INSERT INTO event_sources (id, project_id, name, description) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (project_id, name) DO UPDATE SET name = EXCLUDED.name \
         RETURNING {SOURCE_COLUMNS}, (xmax = 0) AS inserted"
    );
    let (row, inserted) = sqlx::query_as::<_, SourceRowWithFlag>(&sql)
        .bind(Uuid::new_v4())
        .bind(project_id)
        .bind(name)
        .bind(format!("Auto-created source: {}", name))
        .fetch_one(client.pool())
        .await
        .map(|r| (r.source, r.inserted))
        .map_err(db_error)?;

    if inserted {
        debug!(project_id = %project_id, source = %name, "Auto-created event source");
    }
    Ok(row.into())
}

#[derive(FromRow)]
struct SourceRowWithFlag {
    #[sqlx(flatten)]
    source: SourceRow,
    inserted: bool,
}

/// Source by id, scoped to its project.
pub async fn find_source(
    client: &PostgresClient,
    project_id: Uuid,
    source_id: Uuid,
) -> Result<Option<EventSource>> {
    let sql = format!("SELECT {SOURCE_COLUMNS} FROM event_sources WHERE id = $1 AND project_id = $2");
    let row = sqlx::query_as::<_, SourceRow>(&sql)
        .bind(source_id)
        .bind(project_id)
        .fetch_optional(client.pool())
        .await
        .map_err(db_error)?;
    Ok(row.map(EventSource::from))
}

pub async fn list_active_sources(client: &PostgresClient, project_id: Uuid) -> Result<Vec<EventSource>> {
    let sql = format!(
        "SELECT {SOURCE_COLUMNS} FROM event_sources WHERE project_id = $1 AND is_active ORDER BY name"
    );
    let rows = sqlx::query_as::<_, SourceRow>(&sql)
        .bind(project_id)
        .fetch_all(client.pool())
        .await
        .map_err(db_error)?;
    Ok(rows.into_iter().map(EventSource::from).collect())
}
