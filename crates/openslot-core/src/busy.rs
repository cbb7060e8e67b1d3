//! Busy/blocking classification rules.
//!
//! The rule set is a single persisted record; the server wraps it in a
//! store with an explicit load/persist lifecycle. Classification itself is
//! pure: precedence is whitelist, then force-busy, then the calendar-level
//! default, and an empty busy-calendar set means every calendar is busy.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::event::Occurrence;

/// The mutable busy configuration, as persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BusyRules {
    /// Calendars whose occurrences default to blocking. Empty means every
    /// calendar is busy (fail-open).
    pub busy_calendar_ids: BTreeSet<String>,
    /// Series ids that are never blocking, regardless of calendar.
    pub whitelist_ids: BTreeSet<String>,
    /// Series ids that are always blocking, regardless of calendar.
    pub force_busy_ids: BTreeSet<String>,
    /// Display color per calendar id.
    pub calendar_colors: BTreeMap<String, String>,
}

impl BusyRules {
    /// Whether occurrences of `calendar_id` block by default.
    pub fn calendar_is_busy(&self, calendar_id: &str) -> bool {
        self.busy_calendar_ids.is_empty() || self.busy_calendar_ids.contains(calendar_id)
    }

    /// Classifies one occurrence identity.
    ///
    /// Occurrences without a series id skip the whitelist and force-busy
    /// steps and fall through to the calendar default.
    pub fn is_blocking(&self, series_id: Option<&str>, calendar_id: &str) -> bool {
        if let Some(id) = series_id {
            if self.whitelist_ids.contains(id) {
                return false;
            }
            if self.force_busy_ids.contains(id) {
                return true;
            }
        }
        self.calendar_is_busy(calendar_id)
    }

    /// The configured display color for a calendar.
    pub fn color_for(&self, calendar_id: &str) -> Option<&str> {
        self.calendar_colors.get(calendar_id).map(String::as_str)
    }

    /// Annotates an occurrence with its blocking flag and color.
    pub fn classify(&self, occurrence: &mut Occurrence) {
        occurrence.blocking =
            self.is_blocking(occurrence.series_id.as_deref(), &occurrence.calendar_id);
        occurrence.color = self.color_for(&occurrence.calendar_id).map(str::to_owned);
    }

    /// Annotates a whole merged list.
    pub fn classify_all(&self, occurrences: &mut [Occurrence]) {
        for occurrence in occurrences {
            self.classify(occurrence);
        }
    }

    /// List-endpoint visibility: non-blocking occurrences are hidden unless
    /// their calendar is explicitly marked busy. The single-day detail view
    /// bypasses this and shows everything.
    pub fn visible_in_lists(&self, occurrence: &Occurrence) -> bool {
        occurrence.blocking || self.busy_calendar_ids.contains(&occurrence.calendar_id)
    }
}
