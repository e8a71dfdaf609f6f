//! Redis stream transport and sliding-window counters.
//!
//! The event stream is a single Redis stream read through a consumer group,
//! giving at-least-once delivery across competing workers. Rate limit
//! windows are sorted sets scored by epoch milliseconds.

pub mod client;
pub mod config;
pub mod consumer;
pub mod health;
pub mod producer;
pub mod window;

pub use client::*;
pub use config::*;
pub use consumer::*;
pub use producer::*;
pub use window::*;
