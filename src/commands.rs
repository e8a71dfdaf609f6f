//! One-shot job commands.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Subcommand};
use ingest_core::Granularity;
use postgres_client::dashboard::project_event_counts;
use postgres_client::PostgresClient;
use redis_client::{stream_length, RedisClient, StreamConsumer};
use tracing::info;
use worker::{AggregationEngine, AggregationTarget, Materializer, MaterializerConfig, RetentionSweeper};

#[derive(Debug, Subcommand)]
pub enum Command {
    /// HTTP server only
    Serve,
    /// Background workers only
    Worker,
    /// HTTP server and background workers
    All,
    /// Drain the event stream into the row store
    Process(ProcessArgs),
    /// Aggregate one calendar day (default: yesterday)
    AggregateDaily {
        /// YYYY-MM-DD
        date: Option<NaiveDate>,
    },
    /// Aggregate one hour (default: the previous hour)
    AggregateHourly {
        /// Any RFC 3339 instant inside the hour
        at: Option<DateTime<Utc>>,
    },
    /// Aggregate one five-minute bucket (default: the previous bucket)
    #[command(name = "aggregate-5min")]
    AggregateFiveMinute {
        /// Any RFC 3339 instant inside the bucket
        at: Option<DateTime<Utc>>,
    },
    /// Delete raw events past each project's retention
    Cleanup {
        /// Count without deleting
        #[arg(long)]
        dry_run: bool,
    },
    /// Print stream depth and per-project event counts
    Status,
}

#[derive(Debug, Args)]
pub struct ProcessArgs {
    #[arg(long)]
    pub batch_size: Option<usize>,
    #[arg(long)]
    pub max_batches: Option<usize>,
}

pub async fn process(consumer: StreamConsumer, store: PostgresClient, defaults: MaterializerConfig, args: ProcessArgs) -> Result<()> {
    let config = MaterializerConfig {
        batch_size: args.batch_size.unwrap_or(defaults.batch_size),
        max_batches: args.max_batches.unwrap_or(defaults.max_batches),
    };
    let stats = Materializer::with_config(consumer, store, config)
        .process_events()
        .await
        .context("Event processing failed")?;

    info!(
        processed = stats.total_processed,
        rejected = stats.rejected,
        retried = stats.retried,
        batches = stats.batches_processed,
        duration_ms = stats.duration.as_millis() as u64,
        pending = stats.pending,
        stream_length = stats.stream_length,
        "Processing finished"
    );
    Ok(())
}

pub async fn aggregate(store: PostgresClient, granularity: Granularity, target: Option<AggregationTarget>) -> Result<()> {
    let target = target.unwrap_or_else(|| AggregationTarget::previous(granularity, Utc::now()));
    let stats = AggregationEngine::new(store)
        .run(target)
        .await
        .with_context(|| format!("{} aggregation failed", granularity.as_str()))?;

    info!(
        granularity = granularity.as_str(),
        window_start = %stats.window_start,
        window_end = %stats.window_end,
        projects = stats.projects_processed,
        aggregations = stats.aggregations_created,
        summaries = stats.summaries_created,
        "Aggregation finished"
    );
    Ok(())
}

pub async fn cleanup(store: PostgresClient, dry_run: bool) -> Result<()> {
    let mut sweeper = RetentionSweeper::new(store);
    if dry_run {
        sweeper = sweeper.dry_run();
    }
    let stats = sweeper.run().await.context("Retention sweep failed")?;

    for project in &stats.per_project {
        info!(
            project = %project.project_name,
            project_id = %project.project_id,
            retention_days = project.retention_days,
            cutoff = %project.cutoff,
            deleted = project.deleted,
            "Project retention"
        );
    }
    info!(
        projects = stats.projects_processed,
        total = stats.total_deleted,
        dry_run = stats.dry_run,
        "Cleanup finished"
    );
    Ok(())
}

pub async fn status(redis: RedisClient, store: PostgresClient) -> Result<()> {
    let consumer = StreamConsumer::new(redis.clone());
    consumer.ensure_group().await?;
    let length = stream_length(&redis).await?;
    let pending = consumer.pending_count().await?;
    info!(stream_length = length, pending = pending, "Stream status");

    for row in project_event_counts(&store).await? {
        info!(
            project = %row.name,
            project_id = %row.project_id,
            active = row.is_active,
            events = row.event_count,
            "Project events"
        );
    }
    Ok(())
}
