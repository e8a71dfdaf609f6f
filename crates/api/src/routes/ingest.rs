//! Ingestion endpoint handler.

use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use chrono::Utc;
use std::time::Instant;
use telemetry::metrics;
use tracing::debug;

use crate::extractors::{ClientIp, IngestAuth, UserAgent};
use crate::gate::{admit, ClientInfo};
use crate::response::{ApiError, IngestResponse};
use crate::state::AppState;

/// POST /api/events/ingest
///
/// Accepts one event. Responds 202 whether the event was queued or sampled out.
pub async fn ingest_handler(
    State(state): State<AppState>,
    IngestAuth(project): IngestAuth,
    ClientIp(ip): ClientIp,
    UserAgent(user_agent): UserAgent,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let start = Instant::now();

    let admission = admit(&state, &project, &body, ClientInfo { ip, user_agent }, Utc::now()).await?;

    let latency_ms = start.elapsed().as_millis() as u64;
    metrics().ingest_latency_ms.observe(latency_ms);
    debug!(
        project_id = %project.id,
        sampled = admission.is_sampled_out(),
        latency_ms = latency_ms,
        "Event admitted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse::accepted(admission.is_sampled_out())),
    ))
}
