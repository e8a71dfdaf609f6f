//! Sliding-window attempt log on sorted sets.

use crate::client::{transport_error, RedisClient};
use ingest_core::limits::RATE_LIMIT_KEY_TTL_SLACK_SECS;
use ingest_core::Result;
use redis::AsyncCommands;

/// Sorted-set member for one attempt. Unique so simultaneous attempts are
/// never collapsed into one.
pub fn attempt_member(now_ms: i64) -> String {
    format!("{}-{}", now_ms, uuid::Uuid::new_v4().simple())
}

impl RedisClient {
    /// Drop attempts older than the window, then record this one.
    ///
    /// Returns the number of attempts in the window before this one.
    pub async fn record_attempt(&self, key: &str, now_ms: i64, window_ms: i64) -> Result<u64> {
        let mut conn = self.connection();
        let ttl_secs = window_ms / 1000 + RATE_LIMIT_KEY_TTL_SLACK_SECS;

        let (count,): (u64,) = redis::pipe()
            .atomic()
            .zrembyscore(key, 0, now_ms - window_ms)
            .ignore()
            .zcard(key)
            .zadd(key, attempt_member(now_ms), now_ms)
            .ignore()
            .expire(key, ttl_secs)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| transport_error("Rate limit window update failed", e))?;

        Ok(count)
    }

    /// Score of the oldest attempt still in the window.
    pub async fn oldest_attempt_ms(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.connection();
        let oldest: Vec<(String, f64)> = conn
            .zrange_withscores(key, 0, 0)
            .await
            .map_err(|e| transport_error("Rate limit window read failed", e))?;
        Ok(oldest.first().map(|(_, score)| *score as i64))
    }
}
