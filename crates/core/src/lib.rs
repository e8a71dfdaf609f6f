//! Core types, policy resolution, sampling and identity for the ingestion service.

pub mod aggregation;
pub mod auth;
pub mod buckets;
pub mod error;
pub mod events;
pub mod identity;
pub mod limits;
pub mod retention;
pub mod sampling;
pub mod tenant;

pub use aggregation::*;
pub use auth::*;
pub use buckets::*;
pub use error::{AuthFailure, Error, FieldErrors, Result};
pub use events::*;
pub use identity::*;
pub use retention::*;
pub use sampling::*;
pub use tenant::*;
