//! # Temporal Types: Time Windows and Clocks
//!
//! Ranged artifacts (logs, time series) are stored as a set of slices, each
//! covering a [`TimeRange`]. Window bounds are truncated to whole seconds
//! since they appear in ids and file names as epoch seconds.
//!
//! Freshness checks go through the [`Clock`] trait so that TTL behaviour can
//! be tested without sleeping: production code uses [`SystemClock`], tests
//! drive a [`ManualClock`].
//!
//! ## Window Semantics
//!
//! Windows are half-open: `[start, end)`. A record stamped exactly at `end`
//! belongs to the next window.

use std::fmt;

use chrono::{DateTime, Duration, Timelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::DescError;

/// A half-open UTC time window `[start, end)`, seconds precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeRange {
    /// Build a window, truncating both bounds to whole seconds.
    ///
    /// # Errors
    ///
    /// Returns [`DescError::InvalidRange`] when `end` precedes `start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, DescError> {
        let start = truncate_to_seconds(start);
        let end = truncate_to_seconds(end);
        if end < start {
            return Err(DescError::InvalidRange {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }
        Ok(Self { start, end })
    }

    /// Build a window from Unix epoch seconds.
    pub fn from_epoch_secs(start: i64, end: i64) -> Result<Self, DescError> {
        let invalid = || DescError::InvalidRange {
            start: start.to_string(),
            end: end.to_string(),
        };
        let s = DateTime::from_timestamp(start, 0).ok_or_else(invalid)?;
        let e = DateTime::from_timestamp(end, 0).ok_or_else(invalid)?;
        Self::new(s, e)
    }

    /// Window start (inclusive).
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Window end (exclusive).
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Length of the window.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// True if `t` lies in `[start, end)`.
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }

    /// True if the epoch-millisecond instant lies in `[start, end)`.
    pub fn contains_millis(&self, millis: i64) -> bool {
        self.start.timestamp_millis() <= millis && millis < self.end.timestamp_millis()
    }

    /// True if the two windows share at least one instant.
    pub fn intersects(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Id/file-name form: `startSec_endSec`.
    pub fn to_segment(&self) -> String {
        format!("{}_{}", self.start.timestamp(), self.end.timestamp())
    }

    /// Parse the `startSec_endSec` form produced by [`to_segment`](Self::to_segment).
    pub fn parse_segment(segment: &str) -> Option<Self> {
        let (s, e) = segment.split_once('_')?;
        let s: i64 = s.parse().ok()?;
        let e: i64 = e.parse().ok()?;
        Self::from_epoch_secs(s, e).ok()
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%dT%H:%M:%SZ"),
            self.end.format("%Y-%m-%dT%H:%M:%SZ")
        )
    }
}

/// Source of "now" for freshness checks.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current UTC time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Start the clock at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    /// Jump to an absolute time.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Truncate a `DateTime<Utc>` to seconds precision (discard nanoseconds).
fn truncate_to_seconds(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_nanosecond(0).unwrap_or(dt)
}
