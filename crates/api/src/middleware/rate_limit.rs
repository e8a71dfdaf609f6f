//! Sliding-window rate limiting.
//!
//! Each attempt is recorded under a scope key with its epoch-millisecond
//! time. Attempts older than the window are dropped before counting, and a
//! rejected caller is told how long until the oldest attempt leaves the
//! window.

use async_trait::async_trait;
use ingest_core::limits::{DEFAULT_IP_RATE_LIMIT, DEFAULT_PROJECT_RATE_LIMIT, RATE_LIMIT_WINDOW_SECS};
use ingest_core::{Error, RateLimitPolicy, RateLimitScope, Result};
use parking_lot::Mutex;
use redis_client::RedisClient;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use telemetry::metrics;
use tracing::{debug, warn};

/// Storage for per-key attempt windows.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Drop attempts at or before `now_ms - window_ms`, record this attempt,
    /// and return how many attempts were in the window before it.
    async fn record_attempt(&self, key: &str, now_ms: i64, window_ms: i64) -> Result<u64>;

    /// Time of the oldest attempt still recorded for `key`.
    async fn oldest_attempt_ms(&self, key: &str) -> Result<Option<i64>>;

    /// Forget windows with no recent attempts. Stores with native expiry
    /// need not do anything.
    fn cleanup_stale(&self, _now_ms: i64, _window_ms: i64) {}
}

#[async_trait]
impl WindowStore for RedisClient {
    async fn record_attempt(&self, key: &str, now_ms: i64, window_ms: i64) -> Result<u64> {
        RedisClient::record_attempt(self, key, now_ms, window_ms).await
    }

    async fn oldest_attempt_ms(&self, key: &str) -> Result<Option<i64>> {
        RedisClient::oldest_attempt_ms(self, key).await
    }
}

/// Process-local windows, for tests and single-node development.
#[derive(Default)]
pub struct InMemoryWindowStore {
    windows: Mutex<HashMap<String, VecDeque<i64>>>,
}

impl InMemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_count(&self) -> usize {
        self.windows.lock().len()
    }
}

#[async_trait]
impl WindowStore for InMemoryWindowStore {
    async fn record_attempt(&self, key: &str, now_ms: i64, window_ms: i64) -> Result<u64> {
        let mut windows = self.windows.lock();
        let window = windows.entry(key.to_string()).or_default();

        let cutoff = now_ms - window_ms;
        while window.front().is_some_and(|&t| t <= cutoff) {
            window.pop_front();
        }

        let count = window.len() as u64;
        window.push_back(now_ms);
        Ok(count)
    }

    async fn oldest_attempt_ms(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.windows.lock().get(key).and_then(|w| w.front().copied()))
    }

    fn cleanup_stale(&self, now_ms: i64, window_ms: i64) {
        let cutoff = now_ms - window_ms;
        self.windows
            .lock()
            .retain(|_, window| window.back().is_some_and(|&t| t > cutoff));
    }
}

/// What to do when the window store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Admit the request.
    #[default]
    FailOpen,
    /// Reject the request with a server error.
    FailClosed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Per client address, across all projects
    #[serde(default = "default_ip_limit")]
    pub ip_limit_per_minute: u32,
    #[serde(default = "default_project_limit")]
    pub default_project_limit: u32,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

fn default_window_secs() -> u64 {
    RATE_LIMIT_WINDOW_SECS
}

fn default_ip_limit() -> u32 {
    DEFAULT_IP_RATE_LIMIT
}

fn default_project_limit() -> u32 {
    DEFAULT_PROJECT_RATE_LIMIT
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            ip_limit_per_minute: default_ip_limit(),
            default_project_limit: default_project_limit(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after: u64 },
}

pub struct RateLimiter {
    store: Arc<dyn WindowStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn WindowStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    pub fn in_memory(config: RateLimitConfig) -> Self {
        Self::new(Arc::new(InMemoryWindowStore::new()), config)
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn window_ms(&self) -> i64 {
        self.config.window_secs as i64 * 1000
    }

    /// Record an attempt against `key` and decide it.
    pub async fn check(&self, key: &str, limit: u32, now_ms: i64) -> Result<RateDecision> {
        let window_ms = self.window_ms();

        let outcome = async {
            let count = self.store.record_attempt(key, now_ms, window_ms).await?;
            if count < limit as u64 {
                return Ok(RateDecision::Allowed);
            }
            let oldest = self.store.oldest_attempt_ms(key).await?.unwrap_or(now_ms);
            Ok(RateDecision::Limited {
                retry_after: retry_after_secs(window_ms, now_ms, oldest),
            })
        }
        .await;

        match outcome {
            Ok(decision) => Ok(decision),
            Err(e) => match self.config.failure_policy {
                FailurePolicy::FailOpen => {
                    metrics().rate_limiter_fail_open.inc();
                    warn!(key = %key, error = %e, "Rate limiter unavailable, admitting request");
                    Ok(RateDecision::Allowed)
                }
                FailurePolicy::FailClosed => Err(e),
            },
        }
    }

    /// Check the client address first, then the project or source scope.
    pub async fn check_request(&self, ip: &str, policy: &RateLimitPolicy, now_ms: i64) -> Result<()> {
        let ip_scope = RateLimitScope::Ip(ip.to_string());
        // A zero limit means the project never set one
        let scope_limit = if policy.limit == 0 {
            self.config.default_project_limit
        } else {
            policy.limit
        };
        let checks = [
            (&ip_scope, self.config.ip_limit_per_minute),
            (&policy.scope, scope_limit),
        ];

        for (scope, limit) in checks {
            if let RateDecision::Limited { retry_after } = self.check(&scope.key(), limit, now_ms).await? {
                metrics().rate_limited_requests.inc();
                debug!(scope = scope.label(), limit, retry_after, "Rate limit exceeded");
                return Err(Error::rate_limited(scope.label(), retry_after));
            }
        }
        Ok(())
    }

    pub fn cleanup_stale(&self, now_ms: i64) {
        self.store.cleanup_stale(now_ms, self.window_ms());
    }
}

/// Whole seconds until the oldest attempt leaves the window, at least 1.
pub fn retry_after_secs(window_ms: i64, now_ms: i64, oldest_ms: i64) -> u64 {
    let remaining_ms = window_ms - (now_ms - oldest_ms);
    let secs = (remaining_ms + 999).div_euclid(1000);
    secs.max(1) as u64
}

pub type SharedRateLimiter = Arc<RateLimiter>;
