//! Unified error types for the ingestion service.
//!
//! Error codes:
//! - AUTH_001: Authentication errors (single public code, reason kept internal)
//! - VALID_001: Validation errors
//! - RATE_001: Rate limit rejections
//! - QUEUE_001: Stream write failures
//! - PROC_001 / AGG_001: Background job failures
//! - DB_001 / STREAM_001: Store and transport errors

use std::collections::BTreeMap;

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Why authentication failed.
///
/// Only ever logged. Callers see one generic message regardless of the reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// No Authorization header at all.
    MissingHeader,
    /// Header present but not `Bearer <key>`.
    WrongScheme,
    /// Key does not carry the expected class prefix.
    InvalidFormat,
    /// No project owns this key.
    UnknownKey,
    /// Project exists but is disabled.
    InactiveProject,
}

impl AuthFailure {
    /// Stable reason string for structured logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingHeader => "missing_header",
            Self::WrongScheme => "wrong_scheme",
            Self::InvalidFormat => "invalid_format",
            Self::UnknownKey => "unknown_key",
            Self::InactiveProject => "inactive_project",
        }
    }
}

/// Field name to list of messages, as returned to clients on 400.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Unified error type for the ingestion service.
#[derive(Debug, Error)]
pub enum Error {
    #[error("authentication failed ({})", .0.as_str())]
    Authentication(AuthFailure),

    #[error("validation failed: {0:?}")]
    Validation(FieldErrors),

    #[error("rate limit exceeded for {scope}, retry after {retry_after}s")]
    RateLimited { scope: String, retry_after: u64 },

    #[error("queueing failed: {0}")]
    Queueing(String),

    #[error("processing failed: {0}")]
    Processing(String),

    #[error("aggregation failed: {0}")]
    Aggregation(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn auth(reason: AuthFailure) -> Self {
        Self::Authentication(reason)
    }

    /// Single-field validation error.
    pub fn field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.into(), vec![msg.into()]);
        Self::Validation(errors)
    }

    pub fn rate_limited(scope: impl Into<String>, retry_after: u64) -> Self {
        Self::RateLimited {
            scope: scope.into(),
            retry_after,
        }
    }

    pub fn queueing(msg: impl Into<String>) -> Self {
        Self::Queueing(msg.into())
    }

    pub fn processing(msg: impl Into<String>) -> Self {
        Self::Processing(msg.into())
    }

    pub fn aggregation(msg: impl Into<String>) -> Self {
        Self::Aggregation(msg.into())
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Public error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "AUTH_001",
            Self::Validation(_) => "VALID_001",
            Self::Serialization(_) => "VALID_001",
            Self::RateLimited { .. } => "RATE_001",
            Self::Queueing(_) => "QUEUE_001",
            Self::Processing(_) => "PROC_001",
            Self::Aggregation(_) => "AGG_001",
            Self::Database(_) => "DB_001",
            Self::Transport(_) => "STREAM_001",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Authentication(_) => 401,
            Self::Validation(_) => 400,
            Self::Serialization(_) => 400,
            Self::RateLimited { .. } => 429,
            Self::NotFound(_) => 404,
            Self::Queueing(_)
            | Self::Processing(_)
            | Self::Aggregation(_)
            | Self::Database(_)
            | Self::Transport(_)
            | Self::Internal(_) => 500,
        }
    }

    /// Seconds until the caller may retry, for rate limit rejections.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}
