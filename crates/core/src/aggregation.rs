//! Aggregate bucket rows and daily summaries.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::buckets::Granularity;
use crate::limits::TOP_EVENTS_LIMIT;

/// Metrics for one (source, event name) group inside a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketCounts {
    pub event_source_id: Option<Uuid>,
    pub event_name: String,
    pub event_count: i64,
    pub unique_users: i64,
    pub unique_sessions: i64,
}

/// Stored aggregate row; identical shape for every granularity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateBucket {
    pub id: Uuid,
    pub project_id: Uuid,
    pub event_source_id: Option<Uuid>,
    pub event_source_name: Option<String>,
    pub granularity: Granularity,
    pub bucket_start: DateTime<Utc>,
    pub event_name: String,
    pub event_count: i64,
    pub unique_users: i64,
    pub unique_sessions: i64,
    pub updated_at: DateTime<Utc>,
}

/// One entry of the top-events breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopEvent {
    pub event_name: String,
    pub event_count: i64,
    pub unique_users: i64,
}

/// Per-project daily rollup, fully recomputed on every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub project_id: Uuid,
    pub date: NaiveDate,
    pub total_events: i64,
    pub unique_users: i64,
    pub unique_sessions: i64,
    pub unique_event_names: i64,
    pub top_events: Vec<TopEvent>,
    pub source_breakdown: BTreeMap<String, i64>,
}

/// Label used in source breakdowns for events without a source.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// Sort by count descending (name ascending on ties) and keep the top N.
pub fn rank_top_events(mut events: Vec<TopEvent>) -> Vec<TopEvent> {
    events.sort_by(|a, b| {
        b.event_count
            .cmp(&a.event_count)
            .then_with(|| a.event_name.cmp(&b.event_name))
    });
    events.truncate(TOP_EVENTS_LIMIT);
    events
}

/// Fold per-source counts into a breakdown map keyed by source name.
pub fn source_breakdown<I>(counts: I) -> BTreeMap<String, i64>
where
    I: IntoIterator<Item = (Option<String>, i64)>,
{
    let mut map = BTreeMap::new();
    for (name, count) in counts {
        let key = name.unwrap_or_else(|| UNKNOWN_SOURCE.to_string());
        *map.entry(key).or_insert(0) += count;
    }
    map
}
