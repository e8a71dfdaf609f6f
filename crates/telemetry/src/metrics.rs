//! In-process metrics for the ingest path, the materializer and the jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Monotonic counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Last-written value.
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Latency histogram in milliseconds.
#[derive(Debug)]
pub struct Histogram {
    buckets: [AtomicU64; 11],
    sum: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self {
            buckets: Default::default(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }
}

impl Histogram {
    const BUCKET_BOUNDS: [u64; 11] = [1, 5, 10, 25, 50, 100, 250, 500, 1000, 5000, 10000];

    pub fn observe(&self, ms: u64) {
        self.sum.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        let idx = Self::BUCKET_BOUNDS
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(Self::BUCKET_BOUNDS.len() - 1);
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.sum.load(Ordering::Relaxed) as f64 / count as f64
        }
    }

    /// `(upper bound ms, count)` pairs.
    pub fn buckets(&self) -> Vec<(u64, u64)> {
        Self::BUCKET_BOUNDS
            .iter()
            .zip(self.buckets.iter())
            .map(|(&bound, count)| (bound, count.load(Ordering::Relaxed)))
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct Metrics {
    // Ingestion gate
    pub events_received: Counter,
    pub events_accepted: Counter,
    pub events_sampled_out: Counter,
    pub events_failed_validation: Counter,
    pub auth_failures: Counter,
    pub rate_limited_requests: Counter,
    pub rate_limiter_fail_open: Counter,

    // Stream transport
    pub events_queued: Counter,
    pub queue_errors: Counter,

    // Materializer
    pub events_materialized: Counter,
    pub events_rejected: Counter,
    pub materialize_errors: Counter,

    // Jobs
    pub aggregations_written: Counter,
    pub events_deleted: Counter,

    pub ingest_latency_ms: Histogram,
    pub materialize_latency_ms: Histogram,

    pub stream_length: Gauge,
    pub stream_pending: Gauge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub events_received: u64,
    pub events_accepted: u64,
    pub events_sampled_out: u64,
    pub events_failed_validation: u64,
    pub auth_failures: u64,
    pub rate_limited_requests: u64,
    pub rate_limiter_fail_open: u64,
    pub events_queued: u64,
    pub queue_errors: u64,
    pub events_materialized: u64,
    pub events_rejected: u64,
    pub materialize_errors: u64,
    pub aggregations_written: u64,
    pub events_deleted: u64,
    pub ingest_latency_mean_ms: f64,
    pub materialize_latency_mean_ms: f64,
    pub stream_length: u64,
    pub stream_pending: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            events_received: self.events_received.get(),
            events_accepted: self.events_accepted.get(),
            events_sampled_out: self.events_sampled_out.get(),
            events_failed_validation: self.events_failed_validation.get(),
            auth_failures: self.auth_failures.get(),
            rate_limited_requests: self.rate_limited_requests.get(),
            rate_limiter_fail_open: self.rate_limiter_fail_open.get(),
            events_queued: self.events_queued.get(),
            queue_errors: self.queue_errors.get(),
            events_materialized: self.events_materialized.get(),
            events_rejected: self.events_rejected.get(),
            materialize_errors: self.materialize_errors.get(),
            aggregations_written: self.aggregations_written.get(),
            events_deleted: self.events_deleted.get(),
            ingest_latency_mean_ms: self.ingest_latency_ms.mean(),
            materialize_latency_mean_ms: self.materialize_latency_ms.mean(),
            stream_length: self.stream_length.get(),
            stream_pending: self.stream_pending.get(),
        }
    }
}

impl MetricsSnapshot {
    /// Emit the snapshot as one structured log line.
    pub fn log(&self) {
        info!(
            events_received = self.events_received,
            events_accepted = self.events_accepted,
            events_sampled_out = self.events_sampled_out,
            events_failed_validation = self.events_failed_validation,
            auth_failures = self.auth_failures,
            rate_limited_requests = self.rate_limited_requests,
            rate_limiter_fail_open = self.rate_limiter_fail_open,
            events_queued = self.events_queued,
            queue_errors = self.queue_errors,
            events_materialized = self.events_materialized,
            events_rejected = self.events_rejected,
            materialize_errors = self.materialize_errors,
            aggregations_written = self.aggregations_written,
            events_deleted = self.events_deleted,
            ingest_latency_mean_ms = self.ingest_latency_mean_ms,
            materialize_latency_mean_ms = self.materialize_latency_mean_ms,
            stream_length = self.stream_length,
            stream_pending = self.stream_pending,
            "Metrics"
        );
    }
}

pub static METRICS: std::sync::LazyLock<Metrics> = std::sync::LazyLock::new(Metrics::new);

/// Global metrics instance.
pub fn metrics() -> &'static Metrics {
    &METRICS
}
