//! Size limits and policy defaults for the ingestion service.
//!
//! String length limits live in the `#[validate]` attributes on
//! `IngestRequest`, since the derive macro requires literals.

// === Payload Limits ===

/// Maximum serialized size of an event's property bag (64KB).
pub const MAX_PROPERTIES_BYTES: usize = 64 * 1024;

// === Rate Limiting ===

/// Sliding window width in seconds.
pub const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Extra TTL on window keys so idle keys expire after the window closes.
pub const RATE_LIMIT_KEY_TTL_SLACK_SECS: i64 = 10;

/// Default per-project limit (events per minute).
pub const DEFAULT_PROJECT_RATE_LIMIT: u32 = 1000;

/// Default per-IP limit (events per minute).
pub const DEFAULT_IP_RATE_LIMIT: u32 = 1000;

/// Valid range for a project's `rate_limit_per_minute`.
pub const MIN_PROJECT_RATE_LIMIT: u32 = 1;
pub const MAX_PROJECT_RATE_LIMIT: u32 = 100_000;

// === Retention ===

/// Raw event retention when a project does not set one.
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

/// Aggregate retention default (informational; aggregates are never swept).
pub const DEFAULT_AGGREGATION_RETENTION_DAYS: u32 = 365;

// === Dashboard ===

/// Page size when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Number of entries in top-N breakdowns.
pub const TOP_EVENTS_LIMIT: usize = 10;

/// Recency window for the distinct event-name listing.
pub const EVENT_NAMES_LOOKBACK_DAYS: i64 = 30;

/// Window for "active sessions now".
pub const ACTIVE_SESSION_WINDOW_MINUTES: i64 = 60;

// === Credentials ===

/// Random part of a generated key.
pub const API_KEY_TOKEN_LEN: usize = 48;

/// Public (ingestion) key prefix.
pub const PUBLIC_KEY_PREFIX: &str = "sa_";

/// Private (dashboard) key prefix.
pub const PRIVATE_KEY_PREFIX: &str = "sa_priv_";

/// Public key pattern. The token charset excludes `_`, so private keys never match.
pub const PUBLIC_KEY_PATTERN: &str = r"^sa_[A-Za-z0-9]{16,128}$";

/// Private key pattern.
pub const PRIVATE_KEY_PATTERN: &str = r"^sa_priv_[A-Za-z0-9]{16,128}$";
