//! Aggregation bucket math.

use chrono::{DateTime, DurationRound, NaiveDate, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Aggregation bucket width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Daily,
    Hourly,
    FiveMinute,
}

impl Granularity {
    pub const ALL: [Granularity; 3] = [Self::Daily, Self::Hourly, Self::FiveMinute];

    pub fn width(&self) -> TimeDelta {
        match self {
            Self::Daily => TimeDelta::days(1),
            Self::Hourly => TimeDelta::hours(1),
            Self::FiveMinute => TimeDelta::minutes(5),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Hourly => "hourly",
            Self::FiveMinute => "five_minute",
        }
    }

    /// Floor `at` to the start of its bucket.
    pub fn floor(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        at.duration_trunc(self.width()).unwrap_or(at)
    }

    /// Bucket containing `at`.
    pub fn window_containing(&self, at: DateTime<Utc>) -> BucketWindow {
        let start = self.floor(at);
        BucketWindow {
            granularity: *self,
            start,
            end: start + self.width(),
        }
    }

    /// Most recently completed bucket relative to `now`.
    pub fn previous_window(&self, now: DateTime<Utc>) -> BucketWindow {
        self.window_containing(self.floor(now) - self.width())
    }
}

/// Half-open time range `[start, end)` for one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketWindow {
    pub granularity: Granularity,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BucketWindow {
    /// Calendar day window.
    pub fn for_date(date: NaiveDate) -> Self {
        let start = Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN));
        Self {
            granularity: Granularity::Daily,
            start,
            end: start + TimeDelta::days(1),
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.start.date_naive()
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}
