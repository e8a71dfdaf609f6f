//! Worker scheduler for background tasks.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{error, info, warn};

use chrono::{DateTime, TimeDelta, Utc};
use ingest_core::{Granularity, Result};
use postgres_client::PostgresClient;
use redis_client::StreamConsumer;
use serde::{Deserialize, Serialize};
use telemetry::metrics;

use crate::aggregation::{AggregationEngine, AggregationTarget};
use crate::materializer::{Materializer, MaterializerConfig};
use crate::retention::RetentionSweeper;

/// Worker scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_batches")]
    pub max_batches: usize,
    #[serde(default = "default_processing_interval")]
    pub processing_interval_secs: u64,
    #[serde(default = "default_five_minute_interval")]
    pub five_minute_interval_secs: u64,
    #[serde(default = "default_hourly_interval")]
    pub hourly_interval_secs: u64,
    #[serde(default = "default_daily_interval")]
    pub daily_interval_secs: u64,
    /// Scheduled aggregation targets the window that closed at least this
    /// long ago, so events still queued on the stream are stored first
    #[serde(default = "default_aggregation_lag")]
    pub aggregation_lag_secs: u64,
    #[serde(default = "default_retention_interval")]
    pub retention_interval_secs: u64,
    /// How often the metrics snapshot is logged
    #[serde(default = "default_metrics_flush_interval")]
    pub metrics_flush_interval_secs: u64,
    /// Time box for one processing run
    #[serde(default = "default_batch_timeout")]
    pub batch_timeout_secs: u64,
    /// Time box for one aggregation or retention run
    #[serde(default = "default_aggregation_timeout")]
    pub aggregation_timeout_secs: u64,
}

fn default_batch_size() -> usize {
    50
}

fn default_max_batches() -> usize {
    10
}

fn default_processing_interval() -> u64 {
    5
}

fn default_five_minute_interval() -> u64 {
    300
}

fn default_hourly_interval() -> u64 {
    3600
}

fn default_daily_interval() -> u64 {
    86400
}

fn default_aggregation_lag() -> u64 {
    60
}

fn default_retention_interval() -> u64 {
    86400
}

fn default_metrics_flush_interval() -> u64 {
    60
}

fn default_batch_timeout() -> u64 {
    300
}

fn default_aggregation_timeout() -> u64 {
    1800
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_batches: default_max_batches(),
            processing_interval_secs: default_processing_interval(),
            five_minute_interval_secs: default_five_minute_interval(),
            hourly_interval_secs: default_hourly_interval(),
            daily_interval_secs: default_daily_interval(),
            aggregation_lag_secs: default_aggregation_lag(),
            retention_interval_secs: default_retention_interval(),
            metrics_flush_interval_secs: default_metrics_flush_interval(),
            batch_timeout_secs: default_batch_timeout(),
            aggregation_timeout_secs: default_aggregation_timeout(),
        }
    }
}

impl WorkerConfig {
    pub fn materializer(&self) -> MaterializerConfig {
        MaterializerConfig {
            batch_size: self.batch_size,
            max_batches: self.max_batches,
        }
    }

    fn aggregation_interval(&self, granularity: Granularity) -> Duration {
        Duration::from_secs(match granularity {
            Granularity::Daily => self.daily_interval_secs,
            Granularity::Hourly => self.hourly_interval_secs,
            Granularity::FiveMinute => self.five_minute_interval_secs,
        })
    }

    /// Window a scheduled run at `now` aggregates.
    pub fn scheduled_target(&self, granularity: Granularity, now: DateTime<Utc>) -> AggregationTarget {
        let lag = TimeDelta::seconds(self.aggregation_lag_secs as i64);
        AggregationTarget::previous(granularity, now - lag)
    }
}

/// Run `job` under a time box. A timed-out run is logged and picked up
/// again on the next tick.
pub async fn run_timed<T, F>(name: &str, limit: Duration, job: F) -> Option<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(limit, job).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            error!(job = name, error = %e, "Job failed");
            None
        }
        Err(_) => {
            warn!(job = name, timeout_secs = limit.as_secs(), "Job timed out");
            None
        }
    }
}

/// Background worker scheduler.
pub struct WorkerScheduler {
    config: WorkerConfig,
    store: PostgresClient,
    consumer: Option<StreamConsumer>,
}

impl WorkerScheduler {
    pub fn new(config: WorkerConfig, store: PostgresClient) -> Self {
        Self {
            config,
            store,
            consumer: None,
        }
    }

    /// Creates a new scheduler that also drains the event stream.
    pub fn with_consumer(config: WorkerConfig, store: PostgresClient, consumer: StreamConsumer) -> Self {
        Self {
            config,
            store,
            consumer: Some(consumer),
        }
    }

    /// Starts all background workers.
    pub fn start(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        if self.consumer.is_some() {
            let scheduler = self.clone();
            handles.push(tokio::spawn(async move {
                scheduler.run_materializer().await;
            }));
            info!("Materializer started");
        }

        for granularity in Granularity::ALL {
            let scheduler = self.clone();
            handles.push(tokio::spawn(async move {
                scheduler.run_aggregation(granularity).await;
            }));
        }

        let scheduler = self.clone();
        handles.push(tokio::spawn(async move {
            scheduler.run_retention().await;
        }));

        let scheduler = self.clone();
        handles.push(tokio::spawn(async move {
            scheduler.run_metrics_flush().await;
        }));

        info!("Background workers started");
        handles
    }

    async fn run_materializer(&self) {
        let Some(consumer) = self.consumer.clone() else {
            return;
        };
        let materializer = Materializer::with_config(consumer, self.store.clone(), self.config.materializer());
        let limit = Duration::from_secs(self.config.batch_timeout_secs);
        let mut ticker = interval(Duration::from_secs(self.config.processing_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            run_timed("process_events", limit, materializer.process_events()).await;
        }
    }

    async fn run_aggregation(&self, granularity: Granularity) {
        let engine = AggregationEngine::new(self.store.clone());
        let limit = Duration::from_secs(self.config.aggregation_timeout_secs);
        let mut ticker = interval(self.config.aggregation_interval(granularity));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let target = self.config.scheduled_target(granularity, Utc::now());
            run_timed(granularity.as_str(), limit, engine.run(target)).await;
        }
    }

    async fn run_retention(&self) {
        let sweeper = RetentionSweeper::new(self.store.clone());
        let limit = Duration::from_secs(self.config.aggregation_timeout_secs);
        let mut ticker = interval(Duration::from_secs(self.config.retention_interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            run_timed("retention", limit, sweeper.run()).await;
        }
    }

    async fn run_metrics_flush(&self) {
        let mut ticker = interval(Duration::from_secs(self.config.metrics_flush_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            metrics().snapshot().log();
        }
    }
}
