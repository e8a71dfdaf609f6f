//! Postgres row store: tenants, sources, raw events, aggregates and the
//! dashboard read queries.
//!
//! Functions take a [`PostgresClient`] and map driver failures into
//! `ingest_core::Error::Database`.

pub mod aggregates;
pub mod client;
pub mod config;
pub mod dashboard;
pub mod events;
pub mod health;
pub mod projects;
pub mod retention;
pub mod schema;
pub mod sources;
pub mod summaries;

pub use client::PostgresClient;
pub use config::PostgresConfig;
pub use dashboard::{
    AggregateFilter, EventFilter, Page, PageRequest, ProjectEventCount, RealtimeMetrics,
    SourceSummary, StoredEvent,
};
pub use projects::{CreatedProject, NewProject, ProjectKeys};
pub use schema::init_schema;
pub use sources::NewSource;
