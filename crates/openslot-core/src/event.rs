//! Provider-neutral event types.
//!
//! [`RawEvent`] is what every provider adapter produces after parsing its
//! native wire format; [`Occurrence`] is one concrete instance, either a
//! pass-through of a one-off event or the output of recurrence expansion.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::rrule::RecurrenceRule;

/// Which external system an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// CalDAV-style provider delivering raw calendar-object text.
    CalDav,
    /// Token-based REST provider delivering structured event objects.
    Rest,
}

impl ProviderKind {
    /// Stable lowercase name, used in sync-state keys and diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CalDav => "caldav",
            Self::Rest => "rest",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed, provider-neutral calendar event.
///
/// When `rule` is present, `start` is the rule's anchor instant (the first
/// occurrence of the series) and every expansion inherits the duration
/// `effective_end() - start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Stable series identifier, when the provider supplies one.
    pub uid: Option<String>,
    /// Event title.
    pub summary: String,
    /// Start instant (rule anchor for recurring events).
    pub start: DateTime<Utc>,
    /// End instant; absent means the default 30-minute duration.
    pub end: Option<DateTime<Utc>>,
    /// Structured recurrence rule, if the event repeats.
    pub rule: Option<RecurrenceRule>,
    /// Instants excluded from expansion (EXDATE).
    pub exception_dates: BTreeSet<DateTime<Utc>>,
    /// Identifier of the source calendar.
    pub calendar_id: String,
    /// The provider this event came from.
    pub provider: ProviderKind,
}

impl RawEvent {
    /// Duration assumed when a provider omits the end instant.
    pub const DEFAULT_DURATION_MINUTES: i64 = 30;

    /// Creates a new raw event with the required fields.
    pub fn new(
        summary: impl Into<String>,
        start: DateTime<Utc>,
        calendar_id: impl Into<String>,
        provider: ProviderKind,
    ) -> Self {
        Self {
            uid: None,
            summary: summary.into(),
            start,
            end: None,
            rule: None,
            exception_dates: BTreeSet::new(),
            calendar_id: calendar_id.into(),
            provider,
        }
    }

    /// Builder: set the stable series id.
    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    /// Builder: set the end instant.
    pub fn with_end(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    /// Builder: set the recurrence rule.
    pub fn with_rule(mut self, rule: RecurrenceRule) -> Self {
        self.rule = Some(rule);
        self
    }

    /// Builder: add one exception date.
    pub fn with_exception(mut self, exception: DateTime<Utc>) -> Self {
        self.exception_dates.insert(exception);
        self
    }

    /// The end instant, applying the default duration when absent.
    pub fn effective_end(&self) -> DateTime<Utc> {
        self.end
            .unwrap_or(self.start + Duration::minutes(Self::DEFAULT_DURATION_MINUTES))
    }

    /// The duration every occurrence of this event inherits.
    pub fn duration(&self) -> Duration {
        self.effective_end() - self.start
    }
}

/// One concrete event instance at a specific start/end instant.
///
/// Created by expansion or pass-through, annotated once by the busy
/// classifier, immutable afterwards. Never persisted individually.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    /// Series identifier shared by every occurrence of one rule, when known.
    pub series_id: Option<String>,
    /// Event title.
    pub summary: String,
    /// Start instant.
    pub start: DateTime<Utc>,
    /// End instant.
    pub end: DateTime<Utc>,
    /// Identifier of the source calendar.
    pub calendar_id: String,
    /// The provider this occurrence came from.
    pub provider: ProviderKind,
    /// Whether this occurrence counts against availability.
    pub blocking: bool,
    /// Display color, derived from calendar configuration.
    pub color: Option<String>,
}

impl Occurrence {
    /// Creates the occurrence of `raw` starting at `start`, inheriting the
    /// raw event's duration. Classification fields start unset.
    pub fn from_raw(raw: &RawEvent, start: DateTime<Utc>) -> Self {
        Self {
            series_id: raw.uid.clone(),
            summary: raw.summary.clone(),
            start,
            end: start + raw.duration(),
            calendar_id: raw.calendar_id.clone(),
            provider: raw.provider,
            blocking: false,
            color: None,
        }
    }

    /// The merge dedup identity: series id when present, summary otherwise,
    /// paired with the start instant.
    pub fn dedup_key(&self) -> (String, DateTime<Utc>) {
        let identity = self
            .series_id
            .clone()
            .unwrap_or_else(|| self.summary.clone());
        (identity, self.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 5, 10, 0, 0).unwrap()
    }

    #[test]
    fn missing_end_defaults_to_thirty_minutes() {
        let event = RawEvent::new("Checkup", start(), "cal-1", ProviderKind::CalDav);
        assert_eq!(event.effective_end(), start() + Duration::minutes(30));
        assert_eq!(event.duration(), Duration::minutes(30));
    }

    #[test]
    fn explicit_end_wins() {
        let event = RawEvent::new("Checkup", start(), "cal-1", ProviderKind::CalDav)
            .with_end(start() + Duration::hours(2));
        assert_eq!(event.duration(), Duration::hours(2));
    }

    #[test]
    fn occurrence_inherits_duration() {
        let event = RawEvent::new("Standup", start(), "cal-1", ProviderKind::Rest)
            .with_uid("series-1")
            .with_end(start() + Duration::minutes(45));

        let later = start() + Duration::days(7);
        let occ = Occurrence::from_raw(&event, later);
        assert_eq!(occ.start, later);
        assert_eq!(occ.end, later + Duration::minutes(45));
        assert_eq!(occ.series_id.as_deref(), Some("series-1"));
        assert!(!occ.blocking);
    }

    #[test]
    fn dedup_key_falls_back_to_summary() {
        let event = RawEvent::new("Holiday", start(), "cal-1", ProviderKind::CalDav);
        let occ = Occurrence::from_raw(&event, start());
        assert_eq!(occ.dedup_key(), ("Holiday".to_string(), start()));

        let with_uid = Occurrence::from_raw(&event.clone().with_uid("u-1"), start());
        assert_eq!(with_uid.dedup_key(), ("u-1".to_string(), start()));
    }

    #[test]
    fn provider_kind_names() {
        assert_eq!(ProviderKind::CalDav.as_str(), "caldav");
        assert_eq!(ProviderKind::Rest.to_string(), "rest");
    }

    #[test]
    fn serde_roundtrip() {
        let event = RawEvent::new("Checkup", start(), "cal-1", ProviderKind::CalDav)
            .with_uid("u-1")
            .with_exception(start() + Duration::days(1));
        let json = serde_json::to_string(&event).unwrap();
        let parsed: RawEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, parsed);
    }
}
