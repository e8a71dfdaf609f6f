//! Background workers.
//!
//! - Materializer (event stream → raw event rows)
//! - Aggregation (daily, hourly and five-minute buckets plus daily summaries)
//! - Retention (raw event expiry)
//! - Scheduler (periodic, time-boxed runs of the above)

pub mod aggregation;
pub mod materializer;
pub mod retention;
pub mod scheduler;

pub use aggregation::*;
pub use materializer::*;
pub use retention::RetentionSweeper;
pub use scheduler::*;
