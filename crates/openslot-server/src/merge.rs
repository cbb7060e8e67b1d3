//! The merge engine.
//!
//! Fans out to every `(provider, calendar)` pair concurrently, expands
//! recurrences, normalizes everything to UTC occurrences, deduplicates by
//! `(series id or summary, start)` and sorts by start. Every calendar is
//! an isolated failure domain: a fetch error degrades that calendar to an
//! empty contribution plus a status record, never the whole merge.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};

use openslot_core::{Occurrence, ProviderKind, TimeWindow, expand};
use openslot_providers::CalendarProvider;

/// Per-calendar outcome of one merge run, echoed by debug endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarFetchStatus {
    pub provider: ProviderKind,
    pub calendar_id: String,
    pub event_count: usize,
    pub error: Option<String>,
}

/// The result of one merge run: whatever succeeded, plus diagnostics.
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// Deduplicated occurrences, sorted by start.
    pub occurrences: Vec<Occurrence>,
    /// One record per enumerated calendar (plus one per provider whose
    /// calendar listing itself failed).
    pub calendars: Vec<CalendarFetchStatus>,
}

impl MergeOutcome {
    /// True when at least one calendar was enumerated and every single one
    /// failed, the only merge outcome surfaced to callers as an error.
    pub fn all_failed(&self) -> bool {
        !self.calendars.is_empty() && self.calendars.iter().all(|c| c.error.is_some())
    }
}

/// Runs the full merge pipeline for one window.
pub async fn merge_window(
    providers: &[Arc<dyn CalendarProvider>],
    window: TimeWindow,
) -> MergeOutcome {
    let mut statuses = Vec::new();

    // Enumerate calendars from every provider concurrently.
    let listings = join_all(providers.iter().map(|provider| async move {
        (provider.kind(), provider.list_calendars().await)
    }))
    .await;

    let mut pairs: Vec<(&Arc<dyn CalendarProvider>, String)> = Vec::new();
    for (provider, (kind, listing)) in providers.iter().zip(listings) {
        match listing {
            Ok(calendars) => {
                for calendar in calendars {
                    pairs.push((provider, calendar.id));
                }
            }
            Err(error) => {
                warn!(provider = %kind, error = %error, "calendar listing failed");
                statuses.push(CalendarFetchStatus {
                    provider: kind,
                    calendar_id: "*".to_string(),
                    event_count: 0,
                    error: Some(error.to_string()),
                });
            }
        }
    }

    // Fetch every calendar concurrently; each future captures its own
    // error so one failure cannot cancel a sibling.
    let fetches = join_all(pairs.iter().map(|(provider, calendar_id)| async move {
        let result = provider.fetch_calendar(calendar_id, window).await;
        (provider.kind(), calendar_id.clone(), result)
    }))
    .await;

    let mut occurrences: Vec<Occurrence> = Vec::new();
    for (kind, calendar_id, result) in fetches {
        match result {
            Ok(raw_events) => {
                let before = occurrences.len();
                for raw in &raw_events {
                    occurrences.extend(expand(raw, &window));
                }
                statuses.push(CalendarFetchStatus {
                    provider: kind,
                    calendar_id,
                    event_count: occurrences.len() - before,
                    error: None,
                });
            }
            Err(error) => {
                warn!(
                    provider = %kind,
                    calendar = %calendar_id,
                    error = %error,
                    "calendar fetch failed, continuing with the rest"
                );
                statuses.push(CalendarFetchStatus {
                    provider: kind,
                    calendar_id,
                    event_count: 0,
                    error: Some(error.to_string()),
                });
            }
        }
    }

    // First-seen wins, in provider-enumeration order.
    let mut seen = HashSet::new();
    occurrences.retain(|occ| seen.insert(occ.dedup_key()));
    occurrences.sort_by_key(|occ| occ.start);

    debug!(
        occurrences = occurrences.len(),
        calendars = statuses.len(),
        "merge completed"
    );

    MergeOutcome {
        occurrences,
        calendars: statuses,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use openslot_core::{RawEvent, RecurrenceRule};
    use openslot_providers::{
        BoxFuture, CalendarInfo, ErrorProvider, ProviderError, ProviderResult,
    };

    fn utc(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, d, h, 0, 0).unwrap()
    }

    fn window() -> TimeWindow {
        TimeWindow::new(utc(3, 0), utc(17, 0))
    }

    /// A provider serving fixed calendars and events from memory.
    struct StaticProvider {
        kind: ProviderKind,
        calendars: Vec<(String, Vec<RawEvent>)>,
    }

    impl CalendarProvider for StaticProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn list_calendars(&self) -> BoxFuture<'_, ProviderResult<Vec<CalendarInfo>>> {
            let infos = self
                .calendars
                .iter()
                .map(|(id, _)| CalendarInfo::new(id.clone(), id.clone()))
                .collect();
            Box::pin(async move { Ok(infos) })
        }

        fn fetch_calendar<'a>(
            &'a self,
            calendar_id: &'a str,
            _window: TimeWindow,
        ) -> BoxFuture<'a, ProviderResult<Vec<RawEvent>>> {
            let events = self
                .calendars
                .iter()
                .find(|(id, _)| id == calendar_id)
                .map(|(_, events)| events.clone())
                .ok_or_else(|| ProviderError::not_found("no such calendar"));
            Box::pin(async move { events })
        }
    }

    fn event(uid: &str, summary: &str, start: DateTime<Utc>, kind: ProviderKind) -> RawEvent {
        RawEvent::new(summary, start, "ignored", kind).with_uid(uid)
    }

    fn provider(kind: ProviderKind, calendars: Vec<(String, Vec<RawEvent>)>) -> Arc<dyn CalendarProvider> {
        Arc::new(StaticProvider { kind, calendars })
    }

    #[tokio::test]
    async fn merges_and_sorts_across_providers() {
        let caldav = provider(
            ProviderKind::CalDav,
            vec![(
                "cal-a".to_string(),
                vec![event("e2", "Late", utc(4, 15), ProviderKind::CalDav)],
            )],
        );
        let rest = provider(
            ProviderKind::Rest,
            vec![(
                "cal-b".to_string(),
                vec![event("e1", "Early", utc(4, 9), ProviderKind::Rest)],
            )],
        );

        let outcome = merge_window(&[caldav, rest], window()).await;
        assert_eq!(outcome.occurrences.len(), 2);
        assert_eq!(outcome.occurrences[0].summary, "Early");
        assert_eq!(outcome.occurrences[1].summary, "Late");
        assert_eq!(outcome.calendars.len(), 2);
        assert!(outcome.calendars.iter().all(|c| c.error.is_none()));
    }

    #[tokio::test]
    async fn duplicate_series_and_start_collapse_to_one() {
        let shared = event("shared-uid", "Sync", utc(4, 9), ProviderKind::CalDav);
        let first = provider(
            ProviderKind::CalDav,
            vec![("cal-a".to_string(), vec![shared.clone()])],
        );
        let second = provider(
            ProviderKind::Rest,
            vec![(
                "cal-b".to_string(),
                vec![RawEvent::new("Sync", utc(4, 9), "cal-b", ProviderKind::Rest)
                    .with_uid("shared-uid")],
            )],
        );

        let outcome = merge_window(&[first, second], window()).await;
        assert_eq!(outcome.occurrences.len(), 1);
        // First processed, in provider-enumeration order, wins.
        assert_eq!(outcome.occurrences[0].provider, ProviderKind::CalDav);
    }

    #[tokio::test]
    async fn summary_is_the_fallback_identity() {
        let first = provider(
            ProviderKind::CalDav,
            vec![(
                "cal-a".to_string(),
                vec![RawEvent::new("Team lunch", utc(4, 12), "cal-a", ProviderKind::CalDav)],
            )],
        );
        let second = provider(
            ProviderKind::Rest,
            vec![(
                "cal-b".to_string(),
                vec![RawEvent::new("Team lunch", utc(4, 12), "cal-b", ProviderKind::Rest)],
            )],
        );

        let outcome = merge_window(&[first, second], window()).await;
        assert_eq!(outcome.occurrences.len(), 1);
    }

    #[tokio::test]
    async fn one_failing_calendar_does_not_drop_the_rest() {
        let working = provider(
            ProviderKind::Rest,
            vec![(
                "cal-ok".to_string(),
                vec![event("e1", "Kept", utc(4, 9), ProviderKind::Rest)],
            )],
        );
        let broken: Arc<dyn CalendarProvider> = Arc::new(ErrorProvider::new(
            ProviderKind::CalDav,
            ProviderError::timeout("request timed out"),
        ));

        let outcome = merge_window(&[broken, working], window()).await;
        assert_eq!(outcome.occurrences.len(), 1);
        assert!(!outcome.all_failed());

        let failed: Vec<_> = outcome
            .calendars
            .iter()
            .filter(|c| c.error.is_some())
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].provider, ProviderKind::CalDav);
    }

    #[tokio::test]
    async fn recurring_events_expand_inside_the_window() {
        let weekly = RawEvent::new("Clinic", utc(3, 9), "cal-a", ProviderKind::CalDav)
            .with_uid("clinic")
            .with_rule(RecurrenceRule::new(openslot_core::Frequency::Daily, 7));
        let p = provider(ProviderKind::CalDav, vec![("cal-a".to_string(), vec![weekly])]);

        let outcome = merge_window(&[p], window()).await;
        assert_eq!(outcome.occurrences.len(), 2);
        assert_eq!(outcome.calendars[0].event_count, 2);
    }

    #[tokio::test]
    async fn all_failed_requires_at_least_one_calendar() {
        let outcome = merge_window(&[], window()).await;
        assert!(outcome.occurrences.is_empty());
        assert!(!outcome.all_failed());

        let broken: Arc<dyn CalendarProvider> = Arc::new(ErrorProvider::new(
            ProviderKind::Rest,
            ProviderError::authentication("token rejected"),
        ));
        let outcome = merge_window(&[broken], window()).await;
        assert!(outcome.all_failed());
    }
}
