//! Fallback user and session identity.
//!
//! Derived at materialization time when the client did not send an id.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Width of the session bucket.
pub const SESSION_WINDOW_MINUTES: i64 = 30;

fn hex_prefix(input: &str, len: usize) -> String {
    let mut out = hex::encode(Sha256::digest(input.as_bytes()));
    out.truncate(len);
    out
}

/// Pseudo user id from client network identity.
///
/// Stable for the same (ip, user agent, project). Random when both ip and
/// user agent are empty.
pub fn fallback_user_id(ip: &str, user_agent: &str, project_id: Uuid) -> String {
    if ip.is_empty() && user_agent.is_empty() {
        let random = Uuid::new_v4().simple().to_string();
        return format!("anonymous_{}", &random[..12]);
    }
    format!(
        "hash_{}",
        hex_prefix(&format!("{}|{}|{}", ip, user_agent, project_id), 16)
    )
}

/// Start of the 30-minute session bucket containing `at`.
pub fn session_window_start(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(TimeDelta::minutes(SESSION_WINDOW_MINUTES))
        .unwrap_or(at)
}

/// Session id for a user within the bucket containing `at`.
pub fn derive_session_id(user_id: &str, at: DateTime<Utc>) -> String {
    let window = session_window_start(at);
    format!(
        "sess_{}",
        hex_prefix(&format!("{}_{}", user_id, window.to_rfc3339()), 16)
    )
}

/// Fill in whichever of user/session id the client left out.
pub fn resolve_identity(
    user_id: Option<String>,
    session_id: Option<String>,
    ip: &str,
    user_agent: &str,
    project_id: Uuid,
    at: DateTime<Utc>,
) -> (String, String) {
    let user_id = user_id
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| fallback_user_id(ip, user_agent, project_id));
    let session_id = session_id
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| derive_session_id(&user_id, at));
    (user_id, session_id)
}
