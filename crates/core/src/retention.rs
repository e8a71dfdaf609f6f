//! Raw event retention.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Cutoff before which a project's raw events are deleted.
pub fn retention_cutoff(now: DateTime<Utc>, retention_days: u32) -> DateTime<Utc> {
    now - TimeDelta::days(retention_days as i64)
}

/// Outcome of sweeping one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRetention {
    pub project_id: Uuid,
    pub project_name: String,
    pub retention_days: u32,
    pub cutoff: DateTime<Utc>,
    pub deleted: u64,
}

/// A project whose sweep failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionFailure {
    pub project_id: Uuid,
    pub project_name: String,
    pub error: String,
}

/// Outcome of a full sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionStats {
    pub projects_processed: usize,
    pub total_deleted: u64,
    pub dry_run: bool,
    pub per_project: Vec<ProjectRetention>,
    pub failed: Vec<RetentionFailure>,
}

impl RetentionStats {
    pub fn record(&mut self, project: ProjectRetention) {
        self.projects_processed += 1;
        self.total_deleted += project.deleted;
        self.per_project.push(project);
    }

    pub fn record_failure(&mut self, project_id: Uuid, project_name: &str, error: &Error) {
        self.failed.push(RetentionFailure {
            project_id,
            project_name: project_name.to_string(),
            error: error.to_string(),
        });
    }

    /// The stats when every project was swept, otherwise an error naming
    /// the projects that failed.
    pub fn into_result(self) -> Result<Self> {
        if self.failed.is_empty() {
            return Ok(self);
        }
        let details: Vec<String> = self
            .failed
            .iter()
            .map(|f| format!("{} ({}): {}", f.project_name, f.project_id, f.error))
            .collect();
        Err(Error::internal(format!(
            "Retention failed for {} of {} projects: {}",
            self.failed.len(),
            self.failed.len() + self.projects_processed,
            details.join("; ")
        )))
    }
}
