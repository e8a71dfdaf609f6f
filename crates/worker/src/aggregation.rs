//! Bucketed aggregation over raw events.
//!
//! Each run recomputes every active project's groups for one window and
//! overwrites the stored rows. Daily runs also rebuild the project summary.

use chrono::{DateTime, NaiveDate, Utc};
use ingest_core::{BucketWindow, Error, Granularity, Project, Result};
use postgres_client::aggregates::{bucket_counts, upsert_buckets};
use postgres_client::projects::list_active_projects;
use postgres_client::summaries::{compute_daily_summary, upsert_daily_summary};
use postgres_client::PostgresClient;
use serde::Serialize;
use telemetry::metrics;
use tracing::{debug, error, info};

/// Which window an aggregation run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationTarget {
    Daily(NaiveDate),
    /// Any instant inside the hour
    Hourly(DateTime<Utc>),
    /// Any instant inside the five-minute bucket
    FiveMinute(DateTime<Utc>),
}

impl AggregationTarget {
    /// The most recently completed window of `granularity`.
    pub fn previous(granularity: Granularity, now: DateTime<Utc>) -> Self {
        let window = granularity.previous_window(now);
        match granularity {
            Granularity::Daily => Self::Daily(window.date()),
            Granularity::Hourly => Self::Hourly(window.start),
            Granularity::FiveMinute => Self::FiveMinute(window.start),
        }
    }

    pub fn window(&self) -> BucketWindow {
        match *self {
            Self::Daily(date) => BucketWindow::for_date(date),
            Self::Hourly(at) => Granularity::Hourly.window_containing(at),
            Self::FiveMinute(at) => Granularity::FiveMinute.window_containing(at),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregationStats {
    pub granularity: Granularity,
    pub projects_processed: usize,
    pub aggregations_created: usize,
    pub summaries_created: usize,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

impl AggregationStats {
    fn new(window: &BucketWindow) -> Self {
        Self {
            granularity: window.granularity,
            projects_processed: 0,
            aggregations_created: 0,
            summaries_created: 0,
            window_start: window.start,
            window_end: window.end,
        }
    }
}

pub struct AggregationEngine {
    store: PostgresClient,
}

impl AggregationEngine {
    pub fn new(store: PostgresClient) -> Self {
        Self { store }
    }

    pub async fn run(&self, target: AggregationTarget) -> Result<AggregationStats> {
        let window = target.window();
        let mut stats = AggregationStats::new(&window);
        let mut failures = Vec::new();

        for project in list_active_projects(&self.store).await? {
            match self.aggregate_project(&project, &window).await {
                Ok((rows, summary)) => {
                    stats.projects_processed += 1;
                    stats.aggregations_created += rows;
                    stats.summaries_created += summary as usize;
                }
                Err(e) => {
                    error!(
                        project_id = %project.id,
                        granularity = window.granularity.as_str(),
                        window_start = %window.start,
                        error = %e,
                        "Aggregation failed for project"
                    );
                    failures.push(format!("{}: {}", project.id, e));
                }
            }
        }

        metrics().aggregations_written.inc_by(stats.aggregations_created as u64);
        info!(
            granularity = window.granularity.as_str(),
            window_start = %window.start,
            projects = stats.projects_processed,
            aggregations = stats.aggregations_created,
            summaries = stats.summaries_created,
            failures = failures.len(),
            "Aggregation run complete"
        );

        if failures.is_empty() {
            Ok(stats)
        } else {
            Err(Error::aggregation(format!(
                "{} of {} projects failed for {} window {}: {}",
                failures.len(),
                failures.len() + stats.projects_processed,
                window.granularity.as_str(),
                window.start,
                failures.join("; ")
            )))
        }
    }

    pub async fn aggregate_daily(&self, date: NaiveDate) -> Result<AggregationStats> {
        self.run(AggregationTarget::Daily(date)).await
    }

    pub async fn aggregate_hourly(&self, at: DateTime<Utc>) -> Result<AggregationStats> {
        self.run(AggregationTarget::Hourly(at)).await
    }

    pub async fn aggregate_five_minute(&self, at: DateTime<Utc>) -> Result<AggregationStats> {
        self.run(AggregationTarget::FiveMinute(at)).await
    }

    /// Returns rows written and whether a summary was written.
    async fn aggregate_project(&self, project: &Project, window: &BucketWindow) -> Result<(usize, bool)> {
        let counts = bucket_counts(&self.store, project.id, window).await?;
        if counts.is_empty() {
            debug!(project_id = %project.id, "No events in window");
            return Ok((0, false));
        }

        let rows = upsert_buckets(&self.store, project.id, window, &counts).await?;

        let mut summary_written = false;
        if window.granularity == Granularity::Daily {
            if let Some(summary) = compute_daily_summary(&self.store, project.id, window.date()).await? {
                upsert_daily_summary(&self.store, &summary).await?;
                summary_written = true;
            }
        }

        debug!(project_id = %project.id, rows = rows, "Aggregated project");
        Ok((rows, summary_written))
    }
}
