//! Tenant lookups, creation and key regeneration.
//!
//! Key lookups always hit the database so a regenerated key stops working
//! on the very next request.

use crate::client::{db_error, PostgresClient};
use chrono::{DateTime, Utc};
use ingest_core::limits::{
    DEFAULT_AGGREGATION_RETENTION_DAYS, DEFAULT_PROJECT_RATE_LIMIT, DEFAULT_RETENTION_DAYS,
    MAX_PROJECT_RATE_LIMIT, MIN_PROJECT_RATE_LIMIT,
};
use ingest_core::{generate_api_key, Error, KeyClass, Project, Result, SamplingStrategy};
use sqlx::FromRow;
use tracing::info;
use uuid::Uuid;

const PROJECT_COLUMNS: &str = "id, name, rate_limit_per_minute, retention_days, \
    aggregation_retention_days, sampling_enabled, sampling_rate, sampling_strategy, \
    is_active, created_at";

#[derive(Debug, Clone, FromRow)]
struct ProjectRow {
    id: Uuid,
    name: String,
    rate_limit_per_minute: i32,
    retention_days: i32,
    aggregation_retention_days: i32,
    sampling_enabled: bool,
    sampling_rate: f64,
    sampling_strategy: String,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Project {
            id: row.id,
            name: row.name,
            rate_limit_per_minute: row.rate_limit_per_minute.max(0) as u32,
            retention_days: row.retention_days.max(0) as u32,
            aggregation_retention_days: row.aggregation_retention_days.max(0) as u32,
            sampling_enabled: row.sampling_enabled,
            sampling_rate: row.sampling_rate,
            sampling_strategy: SamplingStrategy::parse(&row.sampling_strategy),
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

/// Settings for a new project. Unset fields take the service defaults.
#[derive(Debug, Clone)]
pub struct NewProject {
    pub name: String,
    pub description: String,
    pub rate_limit_per_minute: u32,
    pub retention_days: u32,
    pub aggregation_retention_days: u32,
    pub sampling_enabled: bool,
    pub sampling_rate: f64,
    pub sampling_strategy: SamplingStrategy,
    pub is_active: bool,
}

impl NewProject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            rate_limit_per_minute: DEFAULT_PROJECT_RATE_LIMIT,
            retention_days: DEFAULT_RETENTION_DAYS,
            aggregation_retention_days: DEFAULT_AGGREGATION_RETENTION_DAYS,
            sampling_enabled: false,
            sampling_rate: 1.0,
            sampling_strategy: SamplingStrategy::Random,
            is_active: true,
        }
    }

    pub fn with_rate_limit(mut self, per_minute: u32) -> Self {
        self.rate_limit_per_minute = per_minute;
        self
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    pub fn with_sampling(mut self, rate: f64, strategy: SamplingStrategy) -> Self {
        self.sampling_enabled = true;
        self.sampling_rate = rate;
        self.sampling_strategy = strategy;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(MIN_PROJECT_RATE_LIMIT..=MAX_PROJECT_RATE_LIMIT).contains(&self.rate_limit_per_minute) {
            return Err(Error::field(
                "rate_limit_per_minute",
                format!(
                    "Ensure this value is between {} and {}.",
                    MIN_PROJECT_RATE_LIMIT, MAX_PROJECT_RATE_LIMIT
                ),
            ));
        }
        if !(0.0..=1.0).contains(&self.sampling_rate) {
            return Err(Error::field("sampling_rate", "Ensure this value is between 0 and 1."));
        }
        Ok(())
    }
}

/// Both credentials of a project.
#[derive(Clone)]
pub struct ProjectKeys {
    pub public_key: String,
    pub private_key: String,
}

impl std::fmt::Debug for ProjectKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectKeys")
            .field("public_key", &"<redacted>")
            .field("private_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CreatedProject {
    pub project: Project,
    pub keys: ProjectKeys,
}

pub async fn create_project(client: &PostgresClient, new: &NewProject) -> Result<CreatedProject> {
    new.validate()?;

    let keys = ProjectKeys {
        public_key: generate_api_key(KeyClass::Public),
        private_key: generate_api_key(KeyClass::Private),
    };

    let sql = format!(
        "INSERT INTO projects (id, name, description, public_key, private_key, \
         rate_limit_per_minute, retention_days, aggregation_retention_days, \
         sampling_enabled, sampling_rate, sampling_strategy, is_active) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
         RETURNING {PROJECT_COLUMNS}"
    );
    let row = sqlx::query_as::<_, ProjectRow>(&sql)
        .bind(Uuid::new_v4())
        .bind(&new.name)
        .bind(&new.description)
        .bind(&keys.public_key)
        .bind(&keys.private_key)
        .bind(new.rate_limit_per_minute as i32)
        .bind(new.retention_days as i32)
        .bind(new.aggregation_retention_days as i32)
        .bind(new.sampling_enabled)
        .bind(new.sampling_rate)
        .bind(new.sampling_strategy.as_str())
        .bind(new.is_active)
        .fetch_one(client.pool())
        .await
        .map_err(db_error)?;

    let project = Project::from(row);
    info!(project_id = %project.id, name = %project.name, "Created project");
    Ok(CreatedProject { project, keys })
}

/// Project owning `key` in the given class, active or not.
pub async fn find_project_by_key(
    client: &PostgresClient,
    key: &str,
    class: KeyClass,
) -> Result<Option<Project>> {
    let sql = format!(
        "SELECT {PROJECT_COLUMNS} FROM projects WHERE {} = $1",
        key_column(class)
    );
    let row = sqlx::query_as::<_, ProjectRow>(&sql)
        .bind(key)
        .fetch_optional(client.pool())
        .await
        .map_err(db_error)?;
    Ok(row.map(Project::from))
}

pub async fn get_project(client: &PostgresClient, id: Uuid) -> Result<Option<Project>> {
    let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = $1");
    let row = sqlx::query_as::<_, ProjectRow>(&sql)
        .bind(id)
        .fetch_optional(client.pool())
        .await
        .map_err(db_error)?;
    Ok(row.map(Project::from))
}

pub async fn list_active_projects(client: &PostgresClient) -> Result<Vec<Project>> {
    let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE is_active ORDER BY created_at, id");
    let rows = sqlx::query_as::<_, ProjectRow>(&sql)
        .fetch_all(client.pool())
        .await
        .map_err(db_error)?;
    Ok(rows.into_iter().map(Project::from).collect())
}

/// Replace one key with a fresh value. The old value stops matching as soon
/// as this statement commits.
pub async fn regenerate_key(client: &PostgresClient, id: Uuid, class: KeyClass) -> Result<String> {
    let column = key_column(class);
    let sql = format!(
        "UPDATE projects SET {column} = $2, updated_at = now() WHERE id = $1 RETURNING {column}"
    );
    let key = sqlx::query_scalar::<_, String>(&sql)
        .bind(id)
        .bind(generate_api_key(class))
        .fetch_optional(client.pool())
        .await
        .map_err(db_error)?;

    let key = key.ok_or_else(|| Error::not_found(format!("project {}", id)))?;
    info!(project_id = %id, key_class = class.as_str(), "Regenerated API key");
    Ok(key)
}

pub async fn regenerate_public_key(client: &PostgresClient, id: Uuid) -> Result<String> {
    regenerate_key(client, id, KeyClass::Public).await
}

pub async fn regenerate_private_key(client: &PostgresClient, id: Uuid) -> Result<String> {
    regenerate_key(client, id, KeyClass::Private).await
}

pub async fn set_project_active(client: &PostgresClient, id: Uuid, active: bool) -> Result<()> {
    sqlx::query("UPDATE projects SET is_active = $2, updated_at = now() WHERE id = $1")
        .bind(id)
        .bind(active)
        .execute(client.pool())
        .await
        .map_err(db_error)?;
    Ok(())
}

fn key_column(class: KeyClass) -> &'static str {
    match class {
        KeyClass::Public => "public_key",
        KeyClass::Private => "private_key",
    }
}
