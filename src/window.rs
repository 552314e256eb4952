// src/window.rs
//! Resumable, bounded time window for one cycle.
//!
//! `end` is the cycle start. `start` is the last successful run, unless that
//! is further back than `max_parse_hours`, in which case the window is
//! clamped to the ceiling. Consecutive successful cycles therefore produce
//! contiguous, non-overlapping windows while the gap stays under the ceiling.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use tracing::{info, warn};

pub const DEFAULT_MAX_PARSE_HOURS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    /// Returns `None` unless `start < end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Half-open membership: `[start, end)`.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }

    pub fn hours(&self) -> f64 {
        (self.end - self.start).num_seconds() as f64 / 3600.0
    }
}

/// Compute the window for a cycle starting at `end`.
///
/// A missing checkpoint is treated as older than the ceiling. A checkpoint at
/// or after `end` (clock skew) also falls back to the ceiling so that
/// `start < end` holds.
pub fn compute_window(
    last_run: Option<DateTime<Utc>>,
    end: DateTime<Utc>,
    max_parse_hours: u32,
) -> TimeWindow {
    let hours = max_parse_hours.max(1);
    let ceiling_start = end - ChronoDuration::hours(i64::from(hours));
    let clamped = TimeWindow {
        start: ceiling_start,
        end,
    };

    let Some(last) = last_run else {
        info!(max_hours = hours, "no previous run recorded, using max window");
        return clamped;
    };

    if last >= end {
        warn!(
            last_run = %last.to_rfc3339(),
            now = %end.to_rfc3339(),
            "last run is not in the past, using max window"
        );
        return clamped;
    }

    let elapsed_hours = (end - last).num_milliseconds() as f64 / 3_600_000.0;
    if elapsed_hours > f64::from(hours) {
        info!(
            elapsed_hours = %format!("{elapsed_hours:.1}"),
            max_hours = hours,
            "time since last run exceeds the maximum, clamping window"
        );
        clamped
    } else {
        info!(
            elapsed_hours = %format!("{elapsed_hours:.1}"),
            "parsing since last run"
        );
        TimeWindow { start: last, end }
    }
}
