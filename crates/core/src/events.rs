//! Event submission, queue payload and row types.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors, ValidationErrorsKind};

use crate::error::{Error, FieldErrors, Result};
use crate::limits::MAX_PROPERTIES_BYTES;

/// Event as submitted by a client.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct IngestRequest {
    /// Client-supplied id, used for deduplication when present
    #[validate(length(max = 255))]
    pub event_id: Option<String>,
    #[validate(
        required(message = "This field is required."),
        length(min = 1, max = 255, message = "Ensure this field has between 1 and 255 characters.")
    )]
    pub event_name: Option<String>,
    /// Source name, auto-created on first use
    #[validate(length(max = 255))]
    pub event_source: Option<String>,
    #[validate(length(max = 255))]
    pub user_id: Option<String>,
    #[validate(length(max = 255))]
    pub session_id: Option<String>,
    #[validate(custom(function = "validate_properties"))]
    pub properties: Option<serde_json::Value>,
    /// ISO 8601; defaults to receive time
    #[validate(custom(function = "validate_timestamp"))]
    pub timestamp: Option<String>,
}

fn validate_properties(props: &serde_json::Value) -> std::result::Result<(), ValidationError> {
    if props.is_null() {
        return Ok(());
    }

    if !props.is_object() {
        let mut err = ValidationError::new("properties_not_object");
        err.message = Some("Properties must be a JSON object.".into());
        return Err(err);
    }

    let size = serde_json::to_vec(props).map(|v| v.len()).unwrap_or(0);

    if size > MAX_PROPERTIES_BYTES {
        let mut err = ValidationError::new("properties_too_large");
        err.message = Some(
            format!(
                "Properties too large ({} bytes). Maximum size is {}KB.",
                size,
                MAX_PROPERTIES_BYTES / 1024
            )
            .into(),
        );
        return Err(err);
    }
    Ok(())
}

const TIMESTAMP_FORMAT_MESSAGE: &str = "Datetime has wrong format. Use ISO 8601.";

/// RFC 3339, or an ISO 8601 datetime without an offset taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Some(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|t| t.and_utc())
}

fn validate_timestamp(value: &str) -> std::result::Result<(), ValidationError> {
    parse_timestamp(value).map(|_| ()).ok_or_else(|| {
        let mut err = ValidationError::new("invalid_timestamp");
        err.message = Some(TIMESTAMP_FORMAT_MESSAGE.into());
        err
    })
}

/// Submission after validation, with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedEvent {
    pub event_id: Option<String>,
    pub event_name: String,
    pub event_source: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub properties: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl IngestRequest {
    /// Parse a JSON body.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| Error::field("body", format!("JSON parse error - {}", e)))
    }

    /// Trim, validate and apply defaults.
    pub fn into_validated(mut self, now: DateTime<Utc>) -> Result<ValidatedEvent> {
        self.event_name = self.event_name.map(|n| n.trim().to_string());
        self.event_source = self
            .event_source
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        self.validate()
            .map_err(|errors| Error::Validation(field_errors(&errors)))?;

        let timestamp = match self.timestamp.as_deref() {
            Some(ts) => parse_timestamp(ts).ok_or_else(|| Error::field("timestamp", TIMESTAMP_FORMAT_MESSAGE))?,
            None => now,
        };

        Ok(ValidatedEvent {
            event_id: self.event_id.filter(|s| !s.is_empty()),
            event_name: self.event_name.unwrap_or_default(),
            event_source: self.event_source,
            user_id: self.user_id.filter(|s| !s.is_empty()),
            session_id: self.session_id.filter(|s| !s.is_empty()),
            properties: match self.properties {
                Some(serde_json::Value::Null) | None => serde_json::json!({}),
                Some(props) => props,
            },
            timestamp,
        })
    }
}

/// Flatten validator output into `field -> [messages]`.
pub fn field_errors(errors: &ValidationErrors) -> FieldErrors {
    let mut out = FieldErrors::new();
    for (field, kind) in errors.errors() {
        if let ValidationErrorsKind::Field(errs) = kind {
            let messages = errs
                .iter()
                .map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("Invalid value ({}).", e.code))
                })
                .collect();
            out.insert(field.to_string(), messages);
        }
    }
    out
}

/// Payload written to the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedEvent {
    pub project_id: Uuid,
    pub event_source_id: Option<Uuid>,
    pub event_name: String,
    #[serde(default)]
    pub event_properties: serde_json::Value,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub user_agent: String,
    /// Kept as text so a bad value defaults at materialization instead of failing decode
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

impl QueuedEvent {
    pub fn from_validated(
        event: ValidatedEvent,
        project_id: Uuid,
        event_source_id: Option<Uuid>,
        ip_address: String,
        user_agent: String,
    ) -> Self {
        Self {
            project_id,
            event_source_id,
            event_name: event.event_name,
            event_properties: event.properties,
            user_id: event.user_id,
            session_id: event.session_id,
            ip_address,
            user_agent,
            timestamp: event.timestamp.to_rfc3339(),
            event_id: event.event_id,
        }
    }

    /// Event time, or `fallback` when missing or unparseable.
    pub fn parsed_timestamp(&self, fallback: DateTime<Utc>) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(fallback)
    }
}

/// Fully resolved row ready to persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub id: Uuid,
    pub event_id: Option<String>,
    pub project_id: Uuid,
    pub event_source_id: Option<Uuid>,
    pub event_name: String,
    pub event_properties: serde_json::Value,
    pub user_id: String,
    pub session_id: String,
    pub ip_address: Option<String>,
    pub user_agent: String,
    pub timestamp: DateTime<Utc>,
}
