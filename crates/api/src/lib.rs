//! HTTP layer: ingestion gate, dashboard reads and health endpoints.

pub mod extractors;
pub mod gate;
pub mod middleware;
pub mod response;
pub mod routes;
pub mod state;

pub use gate::{admit, Admission, ClientInfo};
pub use middleware::rate_limit::{
    FailurePolicy, InMemoryWindowStore, RateLimitConfig, RateLimiter, WindowStore,
};
pub use routes::router;
pub use state::AppState;
