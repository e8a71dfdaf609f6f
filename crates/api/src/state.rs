//! Application state shared across handlers.

use crate::middleware::rate_limit::{RateLimitConfig, RateLimiter, SharedRateLimiter, WindowStore};
use chrono::Utc;
use ingest_core::{EventSource, Result, Sampler};
use moka::future::Cache;
use postgres_client::sources::get_or_create_source;
use postgres_client::PostgresClient;
use redis_client::EventQueue;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Cache TTL for resolved sources (60 seconds).
const SOURCE_CACHE_TTL: Duration = Duration::from_secs(60);

/// Maximum cache entries.
const SOURCE_CACHE_MAX_CAPACITY: u64 = 10_000;

/// Interval between sweeps of idle in-memory rate limit windows.
const RATE_LIMIT_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Event sources by `(project_id, name)`.
///
/// Only sources are cached. Projects are looked up on every request so a
/// regenerated or deactivated key stops working immediately.
#[derive(Clone)]
pub struct SourceCache {
    cache: Cache<(Uuid, String), EventSource>,
}

impl Default for SourceCache {
    fn default() -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(SOURCE_CACHE_MAX_CAPACITY)
                .time_to_live(SOURCE_CACHE_TTL)
                .build(),
        }
    }
}

impl SourceCache {
    /// Cached source, creating the row on first use.
    pub async fn resolve(&self, store: &PostgresClient, project_id: Uuid, name: &str) -> Result<EventSource> {
        let cache_key = (project_id, name.to_string());

        if let Some(cached) = self.cache.get(&cache_key).await {
            debug!(project_id = %project_id, source = %name, "Source cache hit");
            return Ok(cached);
        }

        let source = get_or_create_source(store, project_id, name).await?;
        self.cache.insert(cache_key, source.clone()).await;
        Ok(source)
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Event stream producer (Redis in production, mock in tests)
    pub queue: Arc<dyn EventQueue>,
    /// Row store
    pub store: PostgresClient,
    pub rate_limiter: SharedRateLimiter,
    pub sampler: Arc<Sampler>,
    pub sources: SourceCache,
}

impl AppState {
    pub fn new(queue: Arc<dyn EventQueue>, store: PostgresClient, window_store: Arc<dyn WindowStore>) -> Self {
        Self::with_rate_limit(queue, store, window_store, RateLimitConfig::default())
    }

    /// Create with custom rate limit config.
    pub fn with_rate_limit(
        queue: Arc<dyn EventQueue>,
        store: PostgresClient,
        window_store: Arc<dyn WindowStore>,
        rate_config: RateLimitConfig,
    ) -> Self {
        Self {
            queue,
            store,
            rate_limiter: Arc::new(RateLimiter::new(window_store, rate_config)),
            sampler: Arc::new(Sampler::default()),
            sources: SourceCache::default(),
        }
    }

    /// Replace the sampler, e.g. with a seeded random source.
    pub fn with_sampler(mut self, sampler: Sampler) -> Self {
        self.sampler = Arc::new(sampler);
        self
    }

    /// Start the rate limiter cleanup background task.
    /// Returns a handle that can be used to cancel the task.
    pub fn start_rate_limiter_cleanup(&self) -> tokio::task::JoinHandle<()> {
        let rate_limiter = self.rate_limiter.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(RATE_LIMIT_CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                rate_limiter.cleanup_stale(Utc::now().timestamp_millis());
            }
        })
    }
}
