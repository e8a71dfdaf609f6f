//! Dashboard read endpoints, authenticated with the private key.
//!
//! Every handler scopes its query to the authenticated project.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};
use ingest_core::limits::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use ingest_core::{AggregateBucket, DailySummary, FieldErrors, Granularity};
use postgres_client::dashboard::{
    list_aggregates, list_event_names, list_source_summaries, list_summaries, query_events,
    realtime_metrics,
};
use postgres_client::{AggregateFilter, EventFilter, PageRequest, RealtimeMetrics, SourceSummary, StoredEvent};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::extractors::DashboardAuth;
use crate::response::{ApiError, Paginated};
use crate::state::AppState;

const INVALID_FILTERS: &str = "Invalid query parameters";

/// Query string shared by the list endpoints. Everything arrives as text so
/// bad values produce field errors instead of a bare rejection.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub event_name: Option<String>,
    pub event_source_id: Option<String>,
    pub user_id: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

#[derive(Clone, Copy)]
enum Bound {
    Start,
    End,
}

/// Collects field errors while parsing, so one response lists all of them.
#[derive(Default)]
struct ParamErrors(FieldErrors);

impl ParamErrors {
    fn add(&mut self, field: &str, msg: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(msg.into());
    }

    fn finish(self) -> Result<(), ApiError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(ApiError::validation(INVALID_FILTERS, self.0))
        }
    }
}

/// RFC 3339 instant, or a bare date covering the whole day.
fn parse_instant(value: &str, bound: Bound) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
    let start = date.and_time(NaiveTime::MIN).and_utc();
    Some(match bound {
        Bound::Start => start,
        Bound::End => start + TimeDelta::days(1) - TimeDelta::microseconds(1),
    })
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(value).ok().map(|ts| ts.date_naive()))
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl ListParams {
    fn instant(&self, errors: &mut ParamErrors, field: &str, bound: Bound) -> Option<DateTime<Utc>> {
        let raw = match bound {
            Bound::Start => non_empty(&self.start_date),
            Bound::End => non_empty(&self.end_date),
        }?;
        let parsed = parse_instant(raw, bound);
        if parsed.is_none() {
            errors.add(field, "Datetime has wrong format. Use RFC 3339 or YYYY-MM-DD.");
        }
        parsed
    }

    fn date(&self, errors: &mut ParamErrors, field: &str, bound: Bound) -> Option<NaiveDate> {
        let raw = match bound {
            Bound::Start => non_empty(&self.start_date),
            Bound::End => non_empty(&self.end_date),
        }?;
        let parsed = parse_date(raw);
        if parsed.is_none() {
            errors.add(field, "Date has wrong format. Use YYYY-MM-DD.");
        }
        parsed
    }

    fn page_request(&self, errors: &mut ParamErrors) -> PageRequest {
        let page = match non_empty(&self.page).map(str::parse::<u32>) {
            None => 1,
            Some(Ok(page)) if page >= 1 => page,
            Some(_) => {
                errors.add("page", "A valid page number is required.");
                1
            }
        };
        let page_size = match non_empty(&self.page_size).map(str::parse::<u32>) {
            None => DEFAULT_PAGE_SIZE,
            Some(Ok(size)) if size >= 1 => size.min(MAX_PAGE_SIZE),
            Some(_) => {
                errors.add("page_size", "A valid page size is required.");
                DEFAULT_PAGE_SIZE
            }
        };
        PageRequest { page, page_size }
    }

    fn event_filter(&self) -> Result<(EventFilter, PageRequest), ApiError> {
        let mut errors = ParamErrors::default();
        let start = self.instant(&mut errors, "start_date", Bound::Start);
        let end = self.instant(&mut errors, "end_date", Bound::End);
        let event_source_id = non_empty(&self.event_source_id).and_then(|raw| {
            let parsed = Uuid::parse_str(raw).ok();
            if parsed.is_none() {
                errors.add("event_source_id", "Must be a valid UUID.");
            }
            parsed
        });
        let page = self.page_request(&mut errors);
        errors.finish()?;

        Ok((
            EventFilter {
                start,
                end,
                event_name: non_empty(&self.event_name).map(str::to_string),
                event_source_id,
                user_id: non_empty(&self.user_id).map(str::to_string),
            },
            page,
        ))
    }

    fn aggregate_filter(
        &self,
        granularity: Granularity,
        now: DateTime<Utc>,
    ) -> Result<(AggregateFilter, PageRequest), ApiError> {
        let mut errors = ParamErrors::default();
        let mut start = self.instant(&mut errors, "start_date", Bound::Start);
        let end = self.instant(&mut errors, "end_date", Bound::End);
        let page = self.page_request(&mut errors);
        errors.finish()?;

        // Five-minute rows are dense; default to the last day.
        if granularity == Granularity::FiveMinute && start.is_none() && end.is_none() {
            start = Some(now - TimeDelta::hours(24));
        }

        Ok((
            AggregateFilter {
                start,
                end,
                event_name: non_empty(&self.event_name).map(str::to_string),
            },
            page,
        ))
    }

    fn summary_range(&self) -> Result<(Option<NaiveDate>, Option<NaiveDate>, PageRequest), ApiError> {
        let mut errors = ParamErrors::default();
        let start = self.date(&mut errors, "start_date", Bound::Start);
        let end = self.date(&mut errors, "end_date", Bound::End);
        let page = self.page_request(&mut errors);
        errors.finish()?;
        Ok((start, end, page))
    }
}

/// Path segment for each granularity.
pub fn parse_granularity(segment: &str) -> Option<Granularity> {
    match segment {
        "daily" => Some(Granularity::Daily),
        "hourly" => Some(Granularity::Hourly),
        "five-minute" | "five_minute" | "5min" => Some(Granularity::FiveMinute),
        _ => None,
    }
}

/// GET /api/events/query
pub async fn query_handler(
    State(state): State<AppState>,
    DashboardAuth(project): DashboardAuth,
    Query(params): Query<ListParams>,
) -> Result<Json<Paginated<StoredEvent>>, ApiError> {
    let (filter, page) = params.event_filter()?;
    let result = query_events(&state.store, project.id, &filter, page).await?;
    Ok(Json(Paginated::new(result.count, page.page, page.page_size, result.results)))
}

/// GET /api/events/aggregations/:granularity
pub async fn aggregations_handler(
    State(state): State<AppState>,
    DashboardAuth(project): DashboardAuth,
    Path(segment): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<Paginated<AggregateBucket>>, ApiError> {
    let granularity = parse_granularity(&segment)
        .ok_or_else(|| ApiError::not_found(format!("Unknown granularity: {}", segment)))?;
    let (filter, page) = params.aggregate_filter(granularity, Utc::now())?;
    let result = list_aggregates(&state.store, project.id, granularity, &filter, page).await?;
    Ok(Json(Paginated::new(result.count, page.page, page.page_size, result.results)))
}

/// GET /api/events/summaries
pub async fn summaries_handler(
    State(state): State<AppState>,
    DashboardAuth(project): DashboardAuth,
    Query(params): Query<ListParams>,
) -> Result<Json<Paginated<DailySummary>>, ApiError> {
    let (start, end, page) = params.summary_range()?;
    let result = list_summaries(&state.store, project.id, start, end, page).await?;
    Ok(Json(Paginated::new(result.count, page.page, page.page_size, result.results)))
}

/// GET /api/events/metrics/realtime
pub async fn realtime_handler(
    State(state): State<AppState>,
    DashboardAuth(project): DashboardAuth,
) -> Result<Json<RealtimeMetrics>, ApiError> {
    let metrics = realtime_metrics(&state.store, project.id, &project.name, Utc::now()).await?;
    Ok(Json(metrics))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EventNamesResponse {
    pub event_names: Vec<String>,
    pub count: usize,
}

/// GET /api/events/names
pub async fn names_handler(
    State(state): State<AppState>,
    DashboardAuth(project): DashboardAuth,
) -> Result<Json<EventNamesResponse>, ApiError> {
    let event_names = list_event_names(&state.store, project.id, Utc::now()).await?;
    Ok(Json(EventNamesResponse {
        count: event_names.len(),
        event_names,
    }))
}

#[derive(Debug, Serialize)]
pub struct EventSourcesResponse {
    pub event_sources: Vec<SourceSummary>,
    pub count: usize,
}

/// GET /api/events/sources
pub async fn sources_handler(
    State(state): State<AppState>,
    DashboardAuth(project): DashboardAuth,
) -> Result<Json<EventSourcesResponse>, ApiError> {
    let event_sources = list_source_summaries(&state.store, project.id).await?;
    Ok(Json(EventSourcesResponse {
        count: event_sources.len(),
        event_sources,
    }))
}
