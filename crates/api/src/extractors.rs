//! Request extractors.

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use ingest_core::{extract_bearer_key, AuthFailure, Error, KeyClass, Project};
use postgres_client::projects::find_project_by_key;
use std::net::SocketAddr;
use telemetry::metrics;
use tracing::warn;

use crate::response::ApiError;
use crate::state::AppState;

/// Address recorded when no header or socket address is available.
pub const UNKNOWN_IP: &str = "unknown";

/// Project authenticated with its public (ingestion) key.
#[derive(Debug, Clone)]
pub struct IngestAuth(pub Project);

/// Project authenticated with its private (dashboard) key.
#[derive(Debug, Clone)]
pub struct DashboardAuth(pub Project);

/// Resolve the bearer key in `headers` to an active project.
///
/// Every failure collapses to the same 401; the reason is only logged.
pub async fn authenticate(headers: &HeaderMap, state: &AppState, class: KeyClass) -> Result<Project, ApiError> {
    let auth_header = headers.get(header::AUTHORIZATION).and_then(|h| h.to_str().ok());

    let result = async {
        let key = extract_bearer_key(auth_header, class)?;
        let project = find_project_by_key(&state.store, key.as_str(), class)
            .await?
            .ok_or(Error::auth(AuthFailure::UnknownKey))?;
        if !project.is_active {
            return Err(Error::auth(AuthFailure::InactiveProject));
        }
        Ok(project)
    }
    .await;

    result.map_err(|e| {
        if let Error::Authentication(reason) = &e {
            metrics().auth_failures.inc();
            warn!(
                key_class = class.as_str(),
                reason = reason.as_str(),
                header_len = auth_header.map(str::len).unwrap_or(0),
                "Authentication failed"
            );
        }
        ApiError::from(e)
    })
}

#[async_trait]
impl FromRequestParts<AppState> for IngestAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        authenticate(&parts.headers, state, KeyClass::Public)
            .await
            .map(IngestAuth)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for DashboardAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        authenticate(&parts.headers, state, KeyClass::Private)
            .await
            .map(DashboardAuth)
    }
}

/// Client IP address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

/// Forwarded-for first hop, then `X-Real-IP`, then the socket address.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("X-Forwarded-For")
        .and_then(|h| h.to_str().ok())
        .and_then(|xff| xff.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("X-Real-IP")
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_IP.to_string())
}

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(ClientIp(client_ip(&parts.headers, peer)))
    }
}

/// `User-Agent` header, empty when absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAgent(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for UserAgent
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ua = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default();
        Ok(UserAgent(ua.to_string()))
    }
}
