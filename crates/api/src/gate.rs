//! Ingestion gate.
//!
//! Runs an authenticated submission through validation, source resolution,
//! rate limiting and sampling, then queues it. Authentication happens in the
//! extractor before any of this.

use chrono::{DateTime, Utc};
use ingest_core::{EffectivePolicy, IngestRequest, Project, QueuedEvent, Result};
use telemetry::metrics;
use tracing::{debug, error};

use crate::state::AppState;

/// Outcome of an admitted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Written to the stream under this entry id.
    Queued { entry_id: String },
    /// Accepted but dropped by sampling.
    SampledOut,
}

impl Admission {
    pub fn is_sampled_out(&self) -> bool {
        matches!(self, Admission::SampledOut)
    }
}

/// Client details captured from the request.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub ip: String,
    pub user_agent: String,
}

pub async fn admit(
    state: &AppState,
    project: &Project,
    body: &[u8],
    client: ClientInfo,
    now: DateTime<Utc>,
) -> Result<Admission> {
    metrics().events_received.inc();

    let event = IngestRequest::from_json(body)
        .and_then(|req| req.into_validated(now))
        .inspect_err(|_| metrics().events_failed_validation.inc())?;

    let source = match event.event_source.as_deref() {
        Some(name) => Some(state.sources.resolve(&state.store, project.id, name).await?),
        None => None,
    };
    let policy = EffectivePolicy::resolve(project, source.as_ref());

    state
        .rate_limiter
        .check_request(&client.ip, &policy.rate_limit, now.timestamp_millis())
        .await?;

    if !state
        .sampler
        .should_keep(&policy.sampling, event.user_id.as_deref(), project.id, now)
    {
        metrics().events_sampled_out.inc();
        debug!(
            project_id = %project.id,
            event_name = %event.event_name,
            strategy = policy.sampling.strategy.as_str(),
            "Event sampled out"
        );
        return Ok(Admission::SampledOut);
    }

    let queued = QueuedEvent::from_validated(
        event,
        project.id,
        source.as_ref().map(|s| s.id),
        client.ip,
        client.user_agent,
    );

    let entry_id = state.queue.enqueue(&queued).await.inspect_err(|e| {
        error!(project_id = %project.id, error = %e, "Failed to enqueue event");
    })?;

    metrics().events_accepted.inc();
    Ok(Admission::Queued { entry_id })
}
