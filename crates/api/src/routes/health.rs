//! Health check endpoints.

use axum::{extract::State, http::StatusCode, Json};
use postgres_client::health::check_connection;
use telemetry::{health, metrics};
use tracing::warn;

use crate::response::HealthResponse;
use crate::state::AppState;

/// GET /health - Probes both stores and reports stream depth and counters.
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let redis_connected = state.queue.is_healthy().await;
    let postgres_connected = check_connection(&state.store).await;

    if redis_connected {
        health().redis.set_healthy();
    } else {
        health().redis.set_unhealthy("stream unavailable");
    }

    let stream_length = if redis_connected {
        match state.queue.stream_length().await {
            Ok(len) => {
                metrics().stream_length.set(len);
                len
            }
            Err(e) => {
                warn!(error = %e, "Failed to read stream length");
                0
            }
        }
    } else {
        0
    };

    let report = health().report();
    let status = if redis_connected && postgres_connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: format!("{:?}", report.status).to_lowercase(),
            redis_connected,
            postgres_connected,
            stream_length,
            metrics: metrics().snapshot(),
        }),
    )
}

/// GET /health/ready - Readiness probe (can accept traffic).
pub async fn ready_handler() -> StatusCode {
    if health().is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /health/live - Liveness probe (service is running).
pub async fn live_handler() -> StatusCode {
    StatusCode::OK
}
