//! Bookable-slot computation against business hours.
//!
//! Pure date algebra: the server hands in the day's busy intervals
//! (internal meetings plus blocking merged occurrences) and gets back the
//! slot grid. Buffers pad every busy interval on both sides before the
//! overlap test.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::time::local_midnight;

/// Smallest accepted slot length, minutes.
pub const MIN_SLOT_MINUTES: i64 = 15;
/// Largest accepted slot length, minutes.
pub const MAX_SLOT_MINUTES: i64 = 240;
/// Largest accepted buffer, minutes.
pub const MAX_BUFFER_MINUTES: i64 = 60;

/// Clamps a requested slot length into the supported range.
pub fn clamp_slot_minutes(requested: i64) -> i64 {
    requested.clamp(MIN_SLOT_MINUTES, MAX_SLOT_MINUTES)
}

/// Clamps a requested buffer into the supported range.
pub fn clamp_buffer_minutes(requested: i64) -> i64 {
    requested.clamp(0, MAX_BUFFER_MINUTES)
}

/// Open/close minutes-from-midnight for one weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayHours {
    pub open_minutes: u16,
    pub close_minutes: u16,
}

/// Business hours, per weekday. A weekday without an entry is closed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessHours {
    days: [Option<DayHours>; 7],
}

impl BusinessHours {
    /// Creates an all-closed week.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set the hours for one weekday.
    pub fn with_day(mut self, weekday: Weekday, open_minutes: u16, close_minutes: u16) -> Self {
        self.days[weekday.num_days_from_monday() as usize] = Some(DayHours {
            open_minutes,
            close_minutes,
        });
        self
    }

    /// Monday through Friday with the same hours.
    pub fn weekdays(open_minutes: u16, close_minutes: u16) -> Self {
        [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
        ]
        .into_iter()
        .fold(Self::new(), |hours, day| {
            hours.with_day(day, open_minutes, close_minutes)
        })
    }

    /// The hours for one weekday, if it is open.
    pub fn for_weekday(&self, weekday: Weekday) -> Option<DayHours> {
        self.days[weekday.num_days_from_monday() as usize]
    }

    /// True when no weekday has hours at all.
    pub fn is_empty(&self) -> bool {
        self.days.iter().all(Option::is_none)
    }
}

/// One candidate booking slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub available: bool,
}

/// Computes the slot grid for one date.
///
/// Walks the business window in `slot_minutes` increments (both `slot_minutes`
/// and `buffer_minutes` are clamped here); a slot is unavailable when it
/// overlaps any `busy` interval padded by the buffer on both sides, using the
/// half-open test `slot_start < busy_end && slot_end > busy_start`.
///
/// A weekday without configured hours yields an empty grid.
pub fn day_slots(
    date: NaiveDate,
    hours: &BusinessHours,
    offset: FixedOffset,
    slot_minutes: i64,
    buffer_minutes: i64,
    busy: &[(DateTime<Utc>, DateTime<Utc>)],
) -> Vec<AvailabilitySlot> {
    use chrono::Datelike;

    let Some(day) = hours.for_weekday(date.weekday()) else {
        return Vec::new();
    };

    let slot = Duration::minutes(clamp_slot_minutes(slot_minutes));
    let buffer = Duration::minutes(clamp_buffer_minutes(buffer_minutes));

    let midnight = local_midnight(date, offset);
    let open = midnight + Duration::minutes(i64::from(day.open_minutes));
    let close = midnight + Duration::minutes(i64::from(day.close_minutes));

    let mut slots = Vec::new();
    let mut start = open;
    while start + slot <= close {
        let end = start + slot;
        let conflicted = busy
            .iter()
            .any(|(busy_start, busy_end)| start < *busy_end + buffer && end > *busy_start - buffer);
        slots.push(AvailabilitySlot {
            start,
            end,
            available: !conflicted,
        });
        start = end;
    }
    slots
}
