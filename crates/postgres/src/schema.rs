//! Table definitions.
//!
//! Requires Postgres 15+ for `UNIQUE NULLS NOT DISTINCT`, which lets
//! aggregate rows without a source converge on one row per bucket.

use crate::client::{db_error, PostgresClient};
use ingest_core::{Granularity, Result};
use tracing::debug;

pub const CREATE_PROJECTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    id UUID PRIMARY KEY,
    name VARCHAR(255) NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    public_key TEXT NOT NULL UNIQUE,
    private_key TEXT NOT NULL UNIQUE,
    rate_limit_per_minute INTEGER NOT NULL DEFAULT 1000
        CHECK (rate_limit_per_minute BETWEEN 1 AND 100000),
    retention_days INTEGER NOT NULL DEFAULT 90 CHECK (retention_days >= 0),
    aggregation_retention_days INTEGER NOT NULL DEFAULT 365,
    sampling_enabled BOOLEAN NOT NULL DEFAULT FALSE,
    sampling_rate DOUBLE PRECISION NOT NULL DEFAULT 1.0
        CHECK (sampling_rate >= 0 AND sampling_rate <= 1),
    sampling_strategy VARCHAR(20) NOT NULL DEFAULT 'random',
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

pub const CREATE_EVENT_SOURCES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS event_sources (
    id UUID PRIMARY KEY,
    project_id UUID NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    name VARCHAR(255) NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    rate_limit_per_minute INTEGER NULL,
    sampling_enabled BOOLEAN NULL,
    sampling_rate DOUBLE PRECISION NULL,
    sampling_strategy VARCHAR(20) NULL,
    last_event_at TIMESTAMPTZ NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (project_id, name)
)
"#;

pub const CREATE_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id UUID PRIMARY KEY,
    event_id VARCHAR(255) NULL,
    project_id UUID NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    event_source_id UUID NULL REFERENCES event_sources(id) ON DELETE SET NULL,
    event_name VARCHAR(255) NOT NULL,
    event_properties JSONB NOT NULL DEFAULT '{}'::jsonb,
    user_id VARCHAR(255) NOT NULL,
    session_id VARCHAR(255) NOT NULL,
    ip_address TEXT NULL,
    user_agent TEXT NOT NULL DEFAULT '',
    event_timestamp TIMESTAMPTZ NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    processed_at TIMESTAMPTZ NULL
)
"#;

pub const CREATE_EVENTS_INDEXES: [&str; 4] = [
    "CREATE UNIQUE INDEX IF NOT EXISTS events_project_event_id_key \
     ON events (project_id, event_id) WHERE event_id IS NOT NULL",
    "CREATE INDEX IF NOT EXISTS events_project_time_idx ON events (project_id, event_timestamp DESC)",
    "CREATE INDEX IF NOT EXISTS events_project_name_time_idx \
     ON events (project_id, event_name, event_timestamp)",
    "CREATE INDEX IF NOT EXISTS events_project_user_idx ON events (project_id, user_id)",
];

/// Aggregate table for a granularity. All three share one shape.
pub fn aggregate_table(granularity: Granularity) -> &'static str {
    match granularity {
        Granularity::Daily => "event_aggregations_daily",
        Granularity::Hourly => "event_aggregations_hourly",
        Granularity::FiveMinute => "event_aggregations_five_minute",
    }
}

fn create_aggregate_table(granularity: Granularity) -> String {
    let table = aggregate_table(granularity);
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {table} (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    project_id UUID NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    event_source_id UUID NULL REFERENCES event_sources(id) ON DELETE CASCADE,
    event_name VARCHAR(255) NOT NULL,
    bucket_start TIMESTAMPTZ NOT NULL,
    event_count BIGINT NOT NULL DEFAULT 0,
    unique_users BIGINT NOT NULL DEFAULT 0,
    unique_sessions BIGINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT {table}_bucket_key
        UNIQUE NULLS NOT DISTINCT (project_id, event_source_id, event_name, bucket_start)
)
"#
    )
}

fn create_aggregate_index(granularity: Granularity) -> String {
    let table = aggregate_table(granularity);
    format!("CREATE INDEX IF NOT EXISTS {table}_project_bucket_idx ON {table} (project_id, bucket_start DESC)")
}

pub const CREATE_DAILY_SUMMARIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS project_daily_summaries (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    project_id UUID NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    date DATE NOT NULL,
    total_events BIGINT NOT NULL DEFAULT 0,
    unique_users BIGINT NOT NULL DEFAULT 0,
    unique_sessions BIGINT NOT NULL DEFAULT 0,
    unique_event_names BIGINT NOT NULL DEFAULT 0,
    top_events JSONB NOT NULL DEFAULT '[]'::jsonb,
    source_breakdown JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (project_id, date)
)
"#;

/// Every DDL statement, in dependency order.
pub fn all_statements() -> Vec<String> {
    let mut statements = vec![
        CREATE_PROJECTS_TABLE.to_string(),
        CREATE_EVENT_SOURCES_TABLE.to_string(),
        CREATE_EVENTS_TABLE.to_string(),
    ];
    statements.extend(CREATE_EVENTS_INDEXES.iter().map(|s| s.to_string()));
    for granularity in Granularity::ALL {
        statements.push(create_aggregate_table(granularity));
        statements.push(create_aggregate_index(granularity));
    }
    statements.push(CREATE_DAILY_SUMMARIES_TABLE.to_string());
    statements
}

/// Create all tables and indexes that do not exist yet.
pub async fn init_schema(client: &PostgresClient) -> Result<()> {
    for ddl in all_statements() {
        sqlx::query(&ddl)
            .execute(client.pool())
            .await
            .map_err(db_error)?;
    }
    debug!("Postgres schema initialized");
    Ok(())
}
