//! Retention sweeper for raw events.
//!
//! Deletes each active project's raw events older than its retention period.
//! Aggregate tables and summaries are never touched. Deletes are bounded by
//! a fixed cutoff, so running alongside the materializer is safe. A project
//! that fails does not stop the sweep, but the run reports it as an error.

use chrono::{DateTime, Utc};
use ingest_core::{retention_cutoff, Project, ProjectRetention, Result, RetentionStats};
use postgres_client::projects::list_active_projects;
use postgres_client::retention::{count_events_before, delete_events_before};
use postgres_client::PostgresClient;
use telemetry::metrics;
use tracing::{debug, error, info};

pub struct RetentionSweeper {
    store: PostgresClient,
    dry_run: bool,
}

impl RetentionSweeper {
    pub fn new(store: PostgresClient) -> Self {
        Self { store, dry_run: false }
    }

    /// Count what would be deleted without deleting it.
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub async fn run(&self) -> Result<RetentionStats> {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<RetentionStats> {
        info!(dry_run = self.dry_run, "Running retention sweep");

        let mut stats = RetentionStats {
            dry_run: self.dry_run,
            ..Default::default()
        };

        for project in list_active_projects(&self.store).await? {
            match self.sweep_project(&project, now).await {
                Ok(result) => stats.record(result),
                Err(e) => {
                    error!(project_id = %project.id, error = %e, "Retention failed for project");
                    stats.record_failure(project.id, &project.name, &e);
                }
            }
        }

        if !self.dry_run {
            metrics().events_deleted.inc_by(stats.total_deleted);
        }
        info!(
            projects = stats.projects_processed,
            deleted = stats.total_deleted,
            failed = stats.failed.len(),
            dry_run = self.dry_run,
            "Retention sweep complete"
        );
        stats.into_result()
    }

    async fn sweep_project(&self, project: &Project, now: DateTime<Utc>) -> Result<ProjectRetention> {
        let retention_days = project.effective_retention_days();
        let cutoff = retention_cutoff(now, retention_days);

        let deleted = if self.dry_run {
            count_events_before(&self.store, project.id, cutoff).await?
        } else {
            delete_events_before(&self.store, project.id, cutoff).await?
        };

        if deleted > 0 {
            info!(
                project_id = %project.id,
                project = %project.name,
                cutoff = %cutoff,
                deleted = deleted,
                dry_run = self.dry_run,
                "Expired raw events"
            );
        } else {
            debug!(project_id = %project.id, cutoff = %cutoff, "Nothing to expire");
        }

        Ok(ProjectRetention {
            project_id: project.id,
            project_name: project.name.clone(),
            retention_days,
            cutoff,
            deleted,
        })
    }
}
