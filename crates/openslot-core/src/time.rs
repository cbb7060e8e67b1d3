//! Time windows for querying and expanding calendar events.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A half-open UTC interval `[start, end)` used to bound recurrence
/// expansion, provider fetches, and cache scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Start of the window (inclusive).
    pub start: DateTime<Utc>,
    /// End of the window (exclusive).
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a new time window.
    ///
    /// # Panics
    ///
    /// Panics if `start` is after `end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        assert!(start <= end, "TimeWindow start must be <= end");
        Self { start, end }
    }

    /// The window covering a single calendar date in the business timezone.
    pub fn for_date(date: NaiveDate, offset: FixedOffset) -> Self {
        Self::for_dates(date, date, offset)
    }

    /// The window covering the inclusive date range `[first, last]` in the
    /// business timezone.
    pub fn for_dates(first: NaiveDate, last: NaiveDate, offset: FixedOffset) -> Self {
        let start = local_midnight(first, offset);
        let end = local_midnight(last.succ_opt().expect("date in supported range"), offset);
        Self::new(start, end)
    }

    /// Returns the duration of this window.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Half-open containment test: `start <= dt < end`.
    pub fn contains(&self, dt: DateTime<Utc>) -> bool {
        self.start <= dt && dt < self.end
    }

    /// Whether an interval `[other_start, other_end)` overlaps this window.
    pub fn overlaps(&self, other_start: DateTime<Utc>, other_end: DateTime<Utc>) -> bool {
        other_start < self.end && other_end > self.start
    }
}

/// Midnight of `date` in the business timezone, as a UTC instant.
pub fn local_midnight(date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    offset
        .from_local_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight is valid"))
        .single()
        .expect("fixed offsets are unambiguous")
        .with_timezone(&Utc)
}
