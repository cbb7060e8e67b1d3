//! Recurrence rules and their expansion into concrete occurrences.
//!
//! Only the subset of the recurrence grammar this pipeline actually meets
//! is supported: `FREQ`, `INTERVAL`, `COUNT`, `UNTIL` and `BYDAY` (weekly).
//! Exception dates live on the event itself and are applied here.
//!
//! Expansion is a pure function of `(event, window)`: no hidden state, no
//! clock reads, identical inputs give identical output.

use chrono::{DateTime, Datelike, Duration, FixedOffset, Months, Utc, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dates::parse_ical_datetime;
use crate::event::{Occurrence, RawEvent};
use crate::time::TimeWindow;

/// How often a series repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// A structured recurrence rule.
///
/// `until` and `count` may coexist; expansion stops at whichever limit is
/// reached first, and always stops at the caller-supplied window end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    /// Step between repetitions, at least 1.
    pub interval: u32,
    /// Exclusive upper bound on occurrence starts.
    pub until: Option<DateTime<Utc>>,
    /// Cap on emitted occurrences.
    pub count: Option<u32>,
    /// Weekdays to emit on (weekly only); empty means the anchor's weekday.
    pub by_weekday: Vec<Weekday>,
}

/// Why a rule string could not be turned into a [`RecurrenceRule`].
///
/// Rule errors are never fatal to a calendar fetch: the caller logs them
/// and keeps the event as a single non-recurring occurrence.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("rule has no FREQ part")]
    MissingFrequency,

    #[error("unrecognized frequency: {0}")]
    UnknownFrequency(String),

    #[error("invalid {field} value: {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("UNTIL bound out of range: {0}")]
    UntilOutOfRange(String),
}

/// Years a parsed `UNTIL` must fall within; anything outside is treated as
/// a corrupted bound.
const UNTIL_YEAR_RANGE: std::ops::RangeInclusive<i32> = 1970..=2100;

impl RecurrenceRule {
    /// Creates a rule repeating at the given frequency every `interval` steps.
    pub fn new(frequency: Frequency, interval: u32) -> Self {
        Self {
            frequency,
            interval: interval.max(1),
            until: None,
            count: None,
            by_weekday: Vec::new(),
        }
    }

    /// Builder: set the exclusive `until` bound.
    pub fn with_until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    /// Builder: set the occurrence cap.
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    /// Builder: set the weekly weekday set.
    pub fn with_weekdays(mut self, weekdays: impl IntoIterator<Item = Weekday>) -> Self {
        self.by_weekday = weekdays.into_iter().collect();
        normalize_weekdays(&mut self.by_weekday);
        self
    }

    /// Parses an `RRULE`-style `KEY=VALUE;KEY=VALUE` string.
    ///
    /// Unknown keys are ignored; an unknown frequency, a malformed numeric
    /// part, a bad weekday code, or an `UNTIL` outside 1970-2100 is an
    /// error. `business_offset` anchors local-time `UNTIL` values.
    pub fn parse(input: &str, business_offset: FixedOffset) -> Result<Self, RuleError> {
        let mut frequency = None;
        let mut interval = 1u32;
        let mut until = None;
        let mut count = None;
        let mut by_weekday = Vec::new();

        for part in input.trim().trim_start_matches("RRULE:").split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            match key.trim().to_ascii_uppercase().as_str() {
                "FREQ" => {
                    frequency = Some(match value.trim().to_ascii_uppercase().as_str() {
                        "DAILY" => Frequency::Daily,
                        "WEEKLY" => Frequency::Weekly,
                        "MONTHLY" => Frequency::Monthly,
                        "YEARLY" => Frequency::Yearly,
                        other => return Err(RuleError::UnknownFrequency(other.to_string())),
                    });
                }
                "INTERVAL" => {
                    interval = value
                        .trim()
                        .parse::<u32>()
                        .ok()
                        .filter(|v| *v >= 1)
                        .ok_or_else(|| RuleError::InvalidValue {
                            field: "INTERVAL",
                            value: value.to_string(),
                        })?;
                }
                "COUNT" => {
                    count = Some(
                        value
                            .trim()
                            .parse::<u32>()
                            .ok()
                            .filter(|v| *v >= 1)
                            .ok_or_else(|| RuleError::InvalidValue {
                                field: "COUNT",
                                value: value.to_string(),
                            })?,
                    );
                }
                "UNTIL" => {
                    let parsed = parse_ical_datetime(value, business_offset).ok_or_else(|| {
                        RuleError::InvalidValue {
                            field: "UNTIL",
                            value: value.to_string(),
                        }
                    })?;
                    if !UNTIL_YEAR_RANGE.contains(&parsed.year()) {
                        return Err(RuleError::UntilOutOfRange(value.to_string()));
                    }
                    until = Some(parsed);
                }
                "BYDAY" => {
                    for code in value.split(',') {
                        let weekday = weekday_from_code(code.trim()).ok_or_else(|| {
                            RuleError::InvalidValue {
                                field: "BYDAY",
                                value: code.to_string(),
                            }
                        })?;
                        by_weekday.push(weekday);
                    }
                    normalize_weekdays(&mut by_weekday);
                }
                _ => {}
            }
        }

        let frequency = frequency.ok_or(RuleError::MissingFrequency)?;
        if frequency != Frequency::Weekly {
            by_weekday.clear();
        }

        Ok(Self {
            frequency,
            interval,
            until,
            count,
            by_weekday,
        })
    }
}

/// Maps a two-letter weekday code to a weekday.
fn weekday_from_code(code: &str) -> Option<Weekday> {
    match code.to_ascii_uppercase().as_str() {
        "MO" => Some(Weekday::Mon),
        "TU" => Some(Weekday::Tue),
        "WE" => Some(Weekday::Wed),
        "TH" => Some(Weekday::Thu),
        "FR" => Some(Weekday::Fri),
        "SA" => Some(Weekday::Sat),
        "SU" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Sorts weekdays Monday-first and removes duplicates. Expansion relies on
/// the ascending order to know when a week is exhausted.
fn normalize_weekdays(weekdays: &mut Vec<Weekday>) {
    weekdays.sort_by_key(|w| w.num_days_from_monday());
    weekdays.dedup();
}

/// Expands `event` into the ordered list of its occurrences inside `window`.
///
/// A non-recurring event passes through iff its start lies in the window.
/// For recurring events the effective end is `min(window.end, until)`; a
/// candidate matching an exception date is dropped and does not count, and
/// the `count` cap applies to occurrences actually emitted.
pub fn expand(event: &RawEvent, window: &TimeWindow) -> Vec<Occurrence> {
    match &event.rule {
        Some(rule) => expand_rule(event, rule, window),
        None => {
            if window.contains(event.start) {
                vec![Occurrence::from_raw(event, event.start)]
            } else {
                Vec::new()
            }
        }
    }
}

fn expand_rule(event: &RawEvent, rule: &RecurrenceRule, window: &TimeWindow) -> Vec<Occurrence> {
    let effective_end = match rule.until {
        Some(until) => window.end.min(until),
        None => window.end,
    };
    if effective_end <= window.start {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut emitted = 0u32;
    let interval = i64::from(rule.interval.max(1));

    // Emits one candidate; returns true once the count cap is reached.
    let mut emit = |candidate: DateTime<Utc>, out: &mut Vec<Occurrence>| -> bool {
        if event.exception_dates.contains(&candidate) {
            return false;
        }
        if candidate >= window.start {
            out.push(Occurrence::from_raw(event, candidate));
            emitted += 1;
            if let Some(count) = rule.count
                && emitted >= count
            {
                return true;
            }
        }
        false
    };

    match rule.frequency {
        Frequency::Daily => {
            let mut candidate = event.start;
            while candidate < effective_end {
                if emit(candidate, &mut out) {
                    break;
                }
                candidate += Duration::days(interval);
            }
        }
        Frequency::Weekly => {
            let anchor = event.start;
            let weekdays = if rule.by_weekday.is_empty() {
                vec![anchor.weekday()]
            } else {
                rule.by_weekday.clone()
            };
            // Align to the Monday of the anchor's week, preserving time of day.
            let mut base =
                anchor - Duration::days(i64::from(anchor.weekday().num_days_from_monday()));
            'weeks: while base < effective_end {
                for weekday in &weekdays {
                    let candidate =
                        base + Duration::days(i64::from(weekday.num_days_from_monday()));
                    if candidate < anchor {
                        continue;
                    }
                    // Weekdays are ascending, so every later candidate is
                    // past the bound too.
                    if candidate >= effective_end {
                        break 'weeks;
                    }
                    if emit(candidate, &mut out) {
                        break 'weeks;
                    }
                }
                base += Duration::weeks(interval);
            }
        }
        Frequency::Monthly | Frequency::Yearly => {
            let step_months = match rule.frequency {
                Frequency::Monthly => rule.interval.max(1),
                _ => rule.interval.max(1).saturating_mul(12),
            };
            let mut step = 0u32;
            loop {
                let Some(candidate) = event
                    .start
                    .checked_add_months(Months::new(step_months.saturating_mul(step)))
                else {
                    break;
                };
                if candidate >= effective_end {
                    break;
                }
                if emit(candidate, &mut out) {
                    break;
                }
                let Some(next) = step.checked_add(1) else {
                    break;
                };
                step = next;
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ProviderKind;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn offset() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    // Monday 2025-02-03 09:00 UTC.
    fn anchor() -> DateTime<Utc> {
        utc(2025, 2, 3, 9, 0)
    }

    fn event_with(rule: RecurrenceRule) -> RawEvent {
        RawEvent::new("Therapy", anchor(), "cal-1", ProviderKind::CalDav)
            .with_uid("series-1")
            .with_rule(rule)
    }

    fn window_days(days: i64) -> TimeWindow {
        TimeWindow::new(anchor(), anchor() + Duration::days(days))
    }

    mod parsing {
        use super::*;

        #[test]
        fn parses_full_rule() {
            let rule = RecurrenceRule::parse(
                "FREQ=WEEKLY;INTERVAL=2;BYDAY=WE,MO;COUNT=10;UNTIL=20250601T000000Z",
                offset(),
            )
            .unwrap();
            assert_eq!(rule.frequency, Frequency::Weekly);
            assert_eq!(rule.interval, 2);
            assert_eq!(rule.count, Some(10));
            assert_eq!(rule.until, Some(utc(2025, 6, 1, 0, 0)));
            // BYDAY comes back sorted Monday-first
            assert_eq!(rule.by_weekday, vec![Weekday::Mon, Weekday::Wed]);
        }

        #[test]
        fn strips_rrule_prefix_and_ignores_unknown_keys() {
            let rule =
                RecurrenceRule::parse("RRULE:FREQ=DAILY;WKST=MO;BYSETPOS=1", offset()).unwrap();
            assert_eq!(rule.frequency, Frequency::Daily);
            assert_eq!(rule.interval, 1);
        }

        #[test]
        fn unknown_frequency_is_an_error() {
            let err = RecurrenceRule::parse("FREQ=HOURLY", offset()).unwrap_err();
            assert_eq!(err, RuleError::UnknownFrequency("HOURLY".to_string()));
        }

        #[test]
        fn missing_frequency_is_an_error() {
            let err = RecurrenceRule::parse("INTERVAL=2", offset()).unwrap_err();
            assert_eq!(err, RuleError::MissingFrequency);
        }

        #[test]
        fn until_decades_out_of_range_is_an_error() {
            let err =
                RecurrenceRule::parse("FREQ=DAILY;UNTIL=29991231T000000Z", offset()).unwrap_err();
            assert!(matches!(err, RuleError::UntilOutOfRange(_)));
        }

        #[test]
        fn byday_only_applies_to_weekly() {
            let rule = RecurrenceRule::parse("FREQ=MONTHLY;BYDAY=MO", offset()).unwrap();
            assert!(rule.by_weekday.is_empty());
        }

        #[test]
        fn zero_interval_is_an_error() {
            let err = RecurrenceRule::parse("FREQ=DAILY;INTERVAL=0", offset()).unwrap_err();
            assert!(matches!(err, RuleError::InvalidValue { field: "INTERVAL", .. }));
        }
    }

    mod daily {
        use super::*;

        #[test]
        fn count_is_exact_when_window_contains_series() {
            let event = event_with(RecurrenceRule::new(Frequency::Daily, 1).with_count(5));
            let occurrences = expand(&event, &window_days(30));
            assert_eq!(occurrences.len(), 5);
            assert_eq!(occurrences[4].start, anchor() + Duration::days(4));
        }

        #[test]
        fn window_truncation_emits_fewer_than_count() {
            let event = event_with(RecurrenceRule::new(Frequency::Daily, 1).with_count(10));
            let occurrences = expand(&event, &window_days(3));
            assert_eq!(occurrences.len(), 3);
        }

        #[test]
        fn interval_skips_days() {
            let event = event_with(RecurrenceRule::new(Frequency::Daily, 3));
            let occurrences = expand(&event, &window_days(10));
            let starts: Vec<_> = occurrences.iter().map(|o| o.start).collect();
            assert_eq!(
                starts,
                vec![
                    anchor(),
                    anchor() + Duration::days(3),
                    anchor() + Duration::days(6),
                    anchor() + Duration::days(9),
                ]
            );
        }

        #[test]
        fn exception_dates_are_excluded_and_do_not_count() {
            let event = event_with(RecurrenceRule::new(Frequency::Daily, 1).with_count(3))
                .with_exception(anchor() + Duration::days(1));
            let occurrences = expand(&event, &window_days(30));
            // The excluded day is skipped and a later day fills the count.
            assert_eq!(occurrences.len(), 3);
            assert!(
                occurrences
                    .iter()
                    .all(|o| o.start != anchor() + Duration::days(1))
            );
            assert_eq!(occurrences[2].start, anchor() + Duration::days(3));
        }

        #[test]
        fn until_before_window_yields_nothing() {
            let event = event_with(
                RecurrenceRule::new(Frequency::Daily, 1).with_until(anchor() - Duration::days(1)),
            );
            assert!(expand(&event, &window_days(30)).is_empty());
        }

        #[test]
        fn until_caps_before_window_end() {
            let event = event_with(
                RecurrenceRule::new(Frequency::Daily, 1).with_until(anchor() + Duration::days(3)),
            );
            let occurrences = expand(&event, &window_days(30));
            // until is exclusive: days 0, 1, 2.
            assert_eq!(occurrences.len(), 3);
        }

        #[test]
        fn expansion_is_idempotent() {
            let event = event_with(RecurrenceRule::new(Frequency::Daily, 2).with_count(7))
                .with_exception(anchor() + Duration::days(4));
            let window = window_days(60);
            assert_eq!(expand(&event, &window), expand(&event, &window));
        }

        #[test]
        fn all_occurrences_are_inside_the_window() {
            let window = TimeWindow::new(anchor() + Duration::days(2), anchor() + Duration::days(9));
            let event = event_with(RecurrenceRule::new(Frequency::Daily, 1));
            for occ in expand(&event, &window) {
                assert!(window.start <= occ.start && occ.start < window.end);
            }
        }
    }

    mod weekly {
        use super::*;

        #[test]
        fn monday_wednesday_over_two_weeks_yields_four() {
            // Anchored Monday 09:00, BYDAY=MO,WE, 14-day window from the anchor.
            let event = event_with(
                RecurrenceRule::new(Frequency::Weekly, 1)
                    .with_weekdays([Weekday::Mon, Weekday::Wed]),
            );
            let occurrences = expand(&event, &window_days(14));
            let starts: Vec<_> = occurrences.iter().map(|o| o.start).collect();
            assert_eq!(
                starts,
                vec![
                    anchor(),
                    anchor() + Duration::days(2),
                    anchor() + Duration::days(7),
                    anchor() + Duration::days(9),
                ]
            );
        }

        #[test]
        fn unset_byday_uses_the_anchor_weekday() {
            let event = event_with(RecurrenceRule::new(Frequency::Weekly, 1));
            let occurrences = expand(&event, &window_days(21));
            assert_eq!(occurrences.len(), 3);
            assert!(occurrences.iter().all(|o| o.start.weekday() == Weekday::Mon));
        }

        #[test]
        fn candidates_before_the_anchor_are_skipped() {
            // Anchored Wednesday with BYDAY=MO,WE: the Monday of the anchor
            // week precedes the anchor and must not appear.
            let wednesday = anchor() + Duration::days(2);
            let event = RawEvent::new("Clinic", wednesday, "cal-1", ProviderKind::CalDav)
                .with_uid("series-2")
                .with_rule(
                    RecurrenceRule::new(Frequency::Weekly, 1)
                        .with_weekdays([Weekday::Mon, Weekday::Wed]),
                );
            let window = TimeWindow::new(wednesday - Duration::days(3), wednesday + Duration::days(8));
            let starts: Vec<_> = expand(&event, &window).iter().map(|o| o.start).collect();
            assert_eq!(
                starts,
                vec![wednesday, wednesday + Duration::days(5), wednesday + Duration::days(7)]
            );
        }

        #[test]
        fn biweekly_interval_skips_weeks() {
            let event = event_with(RecurrenceRule::new(Frequency::Weekly, 2));
            let occurrences = expand(&event, &window_days(35));
            let starts: Vec<_> = occurrences.iter().map(|o| o.start).collect();
            assert_eq!(
                starts,
                vec![
                    anchor(),
                    anchor() + Duration::days(14),
                    anchor() + Duration::days(28),
                ]
            );
        }

        #[test]
        fn output_is_sorted_by_start() {
            let event = event_with(
                RecurrenceRule::new(Frequency::Weekly, 1)
                    .with_weekdays([Weekday::Fri, Weekday::Mon]),
            );
            let occurrences = expand(&event, &window_days(28));
            let mut sorted = occurrences.clone();
            sorted.sort_by_key(|o| o.start);
            assert_eq!(occurrences, sorted);
        }
    }

    mod monthly_yearly {
        use super::*;

        #[test]
        fn monthly_preserves_time_of_day() {
            let event = event_with(RecurrenceRule::new(Frequency::Monthly, 1));
            let occurrences = expand(
                &event,
                &TimeWindow::new(anchor(), anchor() + Duration::days(80)),
            );
            let starts: Vec<_> = occurrences.iter().map(|o| o.start).collect();
            assert_eq!(
                starts,
                vec![anchor(), utc(2025, 3, 3, 9, 0), utc(2025, 4, 3, 9, 0)]
            );
        }

        #[test]
        fn month_end_anchors_clamp_on_rollover() {
            let jan31 = utc(2025, 1, 31, 12, 0);
            let event = RawEvent::new("Review", jan31, "cal-1", ProviderKind::Rest)
                .with_uid("series-3")
                .with_rule(RecurrenceRule::new(Frequency::Monthly, 1));
            let window = TimeWindow::new(jan31, jan31 + Duration::days(60));
            let starts: Vec<_> = expand(&event, &window).iter().map(|o| o.start).collect();
            // Steps are taken from the anchor, so March recovers day 31.
            assert_eq!(starts, vec![jan31, utc(2025, 2, 28, 12, 0), utc(2025, 3, 31, 12, 0)]);
        }

        #[test]
        fn yearly_steps_the_year() {
            let event = event_with(RecurrenceRule::new(Frequency::Yearly, 1).with_count(3));
            let window = TimeWindow::new(anchor(), anchor() + Duration::days(5 * 365));
            let starts: Vec<_> = expand(&event, &window).iter().map(|o| o.start).collect();
            assert_eq!(
                starts,
                vec![anchor(), utc(2026, 2, 3, 9, 0), utc(2027, 2, 3, 9, 0)]
            );
        }
    }

    mod pass_through {
        use super::*;

        #[test]
        fn non_recurring_event_in_window_passes_through() {
            let event = RawEvent::new("One-off", anchor(), "cal-1", ProviderKind::CalDav);
            let occurrences = expand(&event, &window_days(7));
            assert_eq!(occurrences.len(), 1);
            assert_eq!(occurrences[0].start, anchor());
        }

        #[test]
        fn non_recurring_event_outside_window_is_dropped() {
            let event = RawEvent::new("One-off", anchor(), "cal-1", ProviderKind::CalDav);
            let window = TimeWindow::new(anchor() + Duration::days(1), anchor() + Duration::days(8));
            assert!(expand(&event, &window).is_empty());
        }
    }
}
