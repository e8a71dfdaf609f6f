//! Stream consumer that turns queued events into stored rows.
//!
//! Per batch:
//! 1. Take over entries left idle by other consumers, then read new ones
//! 2. Persist each entry in its own transaction
//! 3. `XACK` entries that were persisted or permanently rejected
//!
//! Entries whose persistence failed stay pending and are claimed again
//! after `claim_idle_ms`.

use chrono::{DateTime, Utc};
use ingest_core::{resolve_identity, NewEvent, QueuedEvent, Result};
use postgres_client::events::insert_event;
use postgres_client::projects::get_project;
use postgres_client::sources::find_source;
use postgres_client::PostgresClient;
use redis_client::{StreamConsumer, StreamEntry};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use telemetry::metrics;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Materializer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterializerConfig {
    /// Entries requested per read
    pub batch_size: usize,
    /// Upper bound on batches per `process_events` call
    pub max_batches: usize,
}

impl Default for MaterializerConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_batches: 10,
        }
    }
}

/// What happened to one stream entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    /// Stored (or already stored under the same client event id). Acked.
    Persisted { duplicate: bool },
    /// Can never be stored. Logged and acked.
    Rejected { reason: String },
    /// Transient failure. Left pending for redelivery.
    Retry { reason: String },
}

impl EntryOutcome {
    pub fn should_ack(&self) -> bool {
        !matches!(self, EntryOutcome::Retry { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub read: usize,
    pub persisted: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub retried: usize,
    pub acked: u64,
}

impl BatchStats {
    fn record(&mut self, outcome: &EntryOutcome) {
        match outcome {
            EntryOutcome::Persisted { duplicate } => {
                self.persisted += 1;
                if *duplicate {
                    self.duplicates += 1;
                }
            }
            EntryOutcome::Rejected { .. } => self.rejected += 1,
            EntryOutcome::Retry { .. } => self.retried += 1,
        }
    }
}

/// Summary of one `process_events` run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessingStats {
    pub total_processed: usize,
    pub rejected: usize,
    pub retried: usize,
    pub batches_processed: usize,
    pub duration: Duration,
    pub events_per_second: f64,
    /// Group pending count after the run
    pub pending: u64,
    pub stream_length: u64,
}

/// Build the row for a queued event, filling in identity the client left out.
pub fn build_event(queued: QueuedEvent, event_source_id: Option<Uuid>, now: DateTime<Utc>) -> NewEvent {
    let timestamp = queued.parsed_timestamp(now);
    let (user_id, session_id) = resolve_identity(
        queued.user_id,
        queued.session_id,
        &queued.ip_address,
        &queued.user_agent,
        queued.project_id,
        timestamp,
    );

    let event_properties = match queued.event_properties {
        serde_json::Value::Null => serde_json::json!({}),
        props => props,
    };

    NewEvent {
        id: Uuid::new_v4(),
        event_id: queued.event_id,
        project_id: queued.project_id,
        event_source_id,
        event_name: queued.event_name,
        event_properties,
        user_id,
        session_id,
        ip_address: Some(queued.ip_address).filter(|ip| !ip.is_empty()),
        user_agent: queued.user_agent,
        timestamp,
    }
}

pub struct Materializer {
    consumer: StreamConsumer,
    store: PostgresClient,
    config: MaterializerConfig,
}

impl Materializer {
    pub fn new(consumer: StreamConsumer, store: PostgresClient) -> Self {
        Self::with_config(consumer, store, MaterializerConfig::default())
    }

    pub fn with_config(consumer: StreamConsumer, store: PostgresClient, config: MaterializerConfig) -> Self {
        Self {
            consumer,
            store,
            config,
        }
    }

    pub fn config(&self) -> &MaterializerConfig {
        &self.config
    }

    /// Process up to `max_batches` batches, stopping at the first empty one.
    ///
    /// Transport errors abort the run. Per-entry storage errors do not.
    pub async fn process_events(&self) -> Result<ProcessingStats> {
        let start = Instant::now();
        self.consumer.ensure_group().await?;

        let mut stats = ProcessingStats::default();
        for _ in 0..self.config.max_batches {
            let batch = self.process_batch().await?;
            if batch.read == 0 {
                break;
            }
            stats.batches_processed += 1;
            stats.total_processed += batch.persisted;
            stats.rejected += batch.rejected;
            stats.retried += batch.retried;
        }

        stats.duration = start.elapsed();
        let secs = stats.duration.as_secs_f64();
        stats.events_per_second = if secs > 0.0 {
            stats.total_processed as f64 / secs
        } else {
            0.0
        };
        stats.pending = self.consumer.pending_count().await?;
        stats.stream_length = self.consumer.len().await?;
        metrics().stream_pending.set(stats.pending);
        metrics().stream_length.set(stats.stream_length);

        if stats.batches_processed > 0 {
            info!(
                processed = stats.total_processed,
                rejected = stats.rejected,
                retried = stats.retried,
                batches = stats.batches_processed,
                pending = stats.pending,
                events_per_second = format!("{:.1}", stats.events_per_second),
                "Event processing run complete"
            );
        }

        Ok(stats)
    }

    /// Claim stale entries first, top up with new ones, then store and ack.
    pub async fn process_batch(&self) -> Result<BatchStats> {
        let batch_size = self.config.batch_size.max(1);

        let mut entries = self.consumer.claim_stale(batch_size).await?;
        if !entries.is_empty() {
            debug!(count = entries.len(), "Claimed stale entries");
        }
        if entries.len() < batch_size {
            entries.extend(self.consumer.read_new(batch_size - entries.len()).await?);
        }

        let mut stats = BatchStats {
            read: entries.len(),
            ..Default::default()
        };
        if entries.is_empty() {
            return Ok(stats);
        }

        let mut ack_ids = Vec::with_capacity(entries.len());
        for entry in &entries {
            let outcome = self.materialize(entry).await;
            stats.record(&outcome);
            if outcome.should_ack() {
                ack_ids.push(entry.id.clone());
            }
        }

        if !ack_ids.is_empty() {
            stats.acked = self.consumer.ack(&ack_ids).await?;
        }

        debug!(
            consumer = self.consumer.consumer_name(),
            read = stats.read,
            persisted = stats.persisted,
            rejected = stats.rejected,
            retried = stats.retried,
            "Processed batch"
        );
        Ok(stats)
    }

    /// Store one entry. Never returns an error; failures become outcomes.
    pub async fn materialize(&self, entry: &StreamEntry) -> EntryOutcome {
        let start = Instant::now();
        let outcome = self.materialize_inner(entry).await;

        match &outcome {
            EntryOutcome::Persisted { .. } => {
                metrics().events_materialized.inc();
                metrics()
                    .materialize_latency_ms
                    .observe(start.elapsed().as_millis() as u64);
            }
            EntryOutcome::Rejected { reason } => {
                metrics().events_rejected.inc();
                warn!(entry_id = %entry.id, reason = %reason, "Rejected stream entry");
            }
            EntryOutcome::Retry { reason } => {
                metrics().materialize_errors.inc();
                warn!(entry_id = %entry.id, reason = %reason, "Entry left pending for retry");
            }
        }
        outcome
    }

    async fn materialize_inner(&self, entry: &StreamEntry) -> EntryOutcome {
        let queued = match entry.decode() {
            Ok(queued) => queued,
            Err(e) => return EntryOutcome::Rejected { reason: e.to_string() },
        };

        let project = match get_project(&self.store, queued.project_id).await {
            Ok(Some(project)) if project.is_active => project,
            Ok(Some(_)) => {
                return EntryOutcome::Rejected {
                    reason: format!("project {} is inactive", queued.project_id),
                }
            }
            Ok(None) => {
                return EntryOutcome::Rejected {
                    reason: format!("project {} not found", queued.project_id),
                }
            }
            Err(e) => return EntryOutcome::Retry { reason: e.to_string() },
        };

        let source_id = match queued.event_source_id {
            Some(source_id) => match find_source(&self.store, project.id, source_id).await {
                Ok(Some(source)) => Some(source.id),
                Ok(None) => {
                    warn!(
                        project_id = %project.id,
                        event_source_id = %source_id,
                        "Stale source reference, storing without source"
                    );
                    None
                }
                Err(e) => return EntryOutcome::Retry { reason: e.to_string() },
            },
            None => None,
        };

        let event = build_event(queued, source_id, Utc::now());
        match insert_event(&self.store, &event).await {
            Ok(inserted) => {
                if !inserted {
                    debug!(
                        project_id = %event.project_id,
                        event_id = ?event.event_id,
                        "Duplicate client event id, skipped"
                    );
                }
                EntryOutcome::Persisted { duplicate: !inserted }
            }
            Err(e) => EntryOutcome::Retry { reason: e.to_string() },
        }
    }
}
