//! Projects (tenants), event sources and policy resolution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::limits::DEFAULT_RETENTION_DAYS;
use crate::sampling::{SamplingPolicy, SamplingStrategy};

/// A tenant in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    /// Events per minute across all sources without an override
    pub rate_limit_per_minute: u32,
    /// Raw event retention
    pub retention_days: u32,
    pub aggregation_retention_days: u32,
    pub sampling_enabled: bool,
    pub sampling_rate: f64,
    pub sampling_strategy: SamplingStrategy,
    /// Gates all authentication
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn sampling_policy(&self) -> SamplingPolicy {
        SamplingPolicy {
            enabled: self.sampling_enabled,
            rate: self.sampling_rate,
            strategy: self.sampling_strategy,
        }
    }

    /// Retention in days, falling back to the global default for unset (zero) values.
    pub fn effective_retention_days(&self) -> u32 {
        if self.retention_days == 0 {
            DEFAULT_RETENTION_DAYS
        } else {
            self.retention_days
        }
    }
}

/// A named origin of events within a project.
///
/// `None` overrides inherit the project value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSource {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub description: String,
    pub is_active: bool,
    pub rate_limit_per_minute: Option<u32>,
    pub sampling_enabled: Option<bool>,
    pub sampling_rate: Option<f64>,
    pub sampling_strategy: Option<SamplingStrategy>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Key space a rate limit applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitScope {
    Project(Uuid),
    Source { project_id: Uuid, source_id: Uuid },
    Ip(String),
}

impl RateLimitScope {
    /// Counter-store key for this scope.
    pub fn key(&self) -> String {
        match self {
            Self::Project(id) => format!("rate_limit:project:{}", id),
            Self::Source {
                project_id,
                source_id,
            } => format!("rate_limit:project:{}:source:{}", project_id, source_id),
            Self::Ip(ip) => format!("rate_limit:ip:{}", ip),
        }
    }

    /// Short label for logs and error messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Project(_) => "project",
            Self::Source { .. } => "source",
            Self::Ip(_) => "ip",
        }
    }
}

/// A limit and the scope it is counted under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub scope: RateLimitScope,
    pub limit: u32,
}

/// Project policy with source overrides applied, computed once per request.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectivePolicy {
    pub rate_limit: RateLimitPolicy,
    pub sampling: SamplingPolicy,
}

impl EffectivePolicy {
    pub fn resolve(project: &Project, source: Option<&EventSource>) -> Self {
        let rate_limit = match source {
            Some(src) => match src.rate_limit_per_minute {
                Some(limit) => RateLimitPolicy {
                    scope: RateLimitScope::Source {
                        project_id: project.id,
                        source_id: src.id,
                    },
                    limit,
                },
                None => project_rate_limit(project),
            },
            None => project_rate_limit(project),
        };

        let sampling = match source {
            Some(src) => match src.sampling_enabled {
                Some(enabled) => SamplingPolicy {
                    enabled,
                    rate: src.sampling_rate.unwrap_or(project.sampling_rate),
                    strategy: src.sampling_strategy.unwrap_or(project.sampling_strategy),
                },
                None => project.sampling_policy(),
            },
            None => project.sampling_policy(),
        };

        Self {
            rate_limit,
            sampling,
        }
    }
}

fn project_rate_limit(project: &Project) -> RateLimitPolicy {
    RateLimitPolicy {
        scope: RateLimitScope::Project(project.id),
        limit: project.rate_limit_per_minute,
    }
}
