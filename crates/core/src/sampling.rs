//! Sampling decisions.
//!
//! A sampled-out event is acknowledged to the caller but never queued.

use chrono::{DateTime, Timelike, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

/// Sampling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SamplingStrategy {
    /// Independent coin flip per event.
    #[default]
    Random,
    /// Stable per (user, project).
    Deterministic,
    /// Admit during the first `rate * 60` seconds of every minute.
    TimeWindow,
}

impl SamplingStrategy {
    /// Parse a stored strategy name. Unknown names fall back to `Random`.
    pub fn parse(s: &str) -> Self {
        match s {
            "deterministic" => Self::Deterministic,
            "time_window" => Self::TimeWindow,
            _ => Self::Random,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::Deterministic => "deterministic",
            Self::TimeWindow => "time_window",
        }
    }
}

/// Resolved sampling policy for one request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingPolicy {
    pub enabled: bool,
    pub rate: f64,
    pub strategy: SamplingStrategy,
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            rate: 1.0,
            strategy: SamplingStrategy::Random,
        }
    }
}

/// Source of uniform draws in `[0, 1)`.
pub trait RandomSource: Send + Sync {
    fn next_fraction(&self) -> f64;
}

/// Thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_fraction(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Applies a [`SamplingPolicy`] to individual events.
#[derive(Clone)]
pub struct Sampler {
    random: Arc<dyn RandomSource>,
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new(Arc::new(ThreadRandom))
    }
}

impl Sampler {
    pub fn new(random: Arc<dyn RandomSource>) -> Self {
        Self { random }
    }

    /// Returns true if the event should be kept.
    pub fn should_keep(
        &self,
        policy: &SamplingPolicy,
        user_id: Option<&str>,
        project_id: Uuid,
        now: DateTime<Utc>,
    ) -> bool {
        if !policy.enabled || policy.rate >= 1.0 {
            return true;
        }
        if policy.rate <= 0.0 {
            return false;
        }

        match policy.strategy {
            SamplingStrategy::Random => self.random.next_fraction() < policy.rate,
            SamplingStrategy::Deterministic => match user_id {
                Some(user_id) if !user_id.is_empty() => {
                    deterministic_fraction(user_id, project_id) < policy.rate
                }
                _ => self.random.next_fraction() < policy.rate,
            },
            SamplingStrategy::TimeWindow => (now.second() as f64 / 60.0) < policy.rate,
        }
    }
}

/// Stable fraction in `[0, 1)` for a (user, project) pair.
pub fn deterministic_fraction(user_id: &str, project_id: Uuid) -> f64 {
    let digest = Sha256::digest(format!("{}_{}", user_id, project_id).as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) % 1000) as f64 / 1000.0
}
