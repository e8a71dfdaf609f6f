//! Response bodies and error rendering.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use ingest_core::{Error, FieldErrors};
use serde::{Deserialize, Serialize};
use telemetry::MetricsSnapshot;
use tracing::error;

/// Body returned for every admitted event.
#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub status: String,
    /// True when the event was dropped by sampling and never queued
    pub sampled: bool,
}

impl IngestResponse {
    pub fn accepted(sampled: bool) -> Self {
        Self {
            status: "accepted".to_string(),
            sampled,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub redis_connected: bool,
    pub postgres_connected: bool,
    pub stream_length: u64,
    pub metrics: MetricsSnapshot,
}

/// Paginated listing. `next` and `previous` are page numbers.
#[derive(Debug, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub count: i64,
    pub next: Option<u32>,
    pub previous: Option<u32>,
    pub results: Vec<T>,
}

impl<T> Paginated<T> {
    pub fn new(count: i64, page: u32, page_size: u32, results: Vec<T>) -> Self {
        let seen = page as i64 * page_size as i64;
        Self {
            count,
            next: (seen < count).then_some(page + 1),
            previous: (page > 1).then(|| page - 1),
            results,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<FieldErrors>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            details: None,
            retry_after: None,
        }
    }
}

pub const AUTH_ERROR_MESSAGE: &str = "Invalid or missing API key";

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub response: ErrorResponse,
    challenge: bool,
}

impl ApiError {
    pub fn with_code(status: StatusCode, code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            status,
            response: ErrorResponse::new(msg, code),
            challenge: false,
        }
    }

    /// Generic 401. The reason is never disclosed.
    pub fn unauthorized() -> Self {
        Self {
            challenge: true,
            ..Self::with_code(StatusCode::UNAUTHORIZED, "AUTH_001", AUTH_ERROR_MESSAGE)
        }
    }

    pub fn validation(msg: impl Into<String>, details: FieldErrors) -> Self {
        let mut err = Self::with_code(StatusCode::BAD_REQUEST, "VALID_001", msg);
        err.response.details = Some(details);
        err
    }

    pub fn rate_limited(retry_after: u64) -> Self {
        let mut err = Self::with_code(StatusCode::TOO_MANY_REQUESTS, "RATE_001", "Rate limit exceeded");
        err.response.retry_after = Some(retry_after);
        err
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::with_code(StatusCode::NOT_FOUND, "NOT_FOUND", msg)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let retry_after = self.response.retry_after;
        let mut response = (self.status, Json(self.response)).into_response();

        if let Some(retry_after) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        if self.challenge {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }

        response
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Authentication(_) => ApiError::unauthorized(),
            Error::Validation(fields) => ApiError::validation("Invalid event data", fields),
            Error::RateLimited { retry_after, .. } => ApiError::rate_limited(retry_after),
            Error::Queueing(_) => {
                ApiError::with_code(StatusCode::INTERNAL_SERVER_ERROR, "QUEUE_001", "Failed to process event")
            }
            Error::NotFound(msg) => ApiError::not_found(msg),
            other => {
                error!(error = %other, code = other.code(), "Request failed");
                ApiError::with_code(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    other.code(),
                    "Internal server error",
                )
            }
        }
    }
}
