//! Process-local telemetry: structured logging setup, counters and
//! histograms for the ingest path and background jobs, and the component
//! health registry behind the health endpoints.

pub mod health;
pub mod metrics;
pub mod tracing_setup;

pub use health::*;
pub use metrics::*;
pub use tracing_setup::*;
