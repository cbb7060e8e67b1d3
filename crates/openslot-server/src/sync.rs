//! Background sync scheduler.
//!
//! A periodic tick scans every `(provider, calendar)` pair, skips anything
//! mid-sync or not yet due, and runs the fetch/expand/classify pipeline
//! for the rest with bounded concurrency, writing results into the
//! durable store and the in-memory cache. Failures only update
//! bookkeeping: each error pushes the calendar's `next_sync_at` further
//! out, capped at the maximum interval. Nothing here ever propagates an
//! error outward.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, Semaphore, mpsc};
use tracing::{debug, info, warn};

use openslot_core::{TimeWindow, expand};
use openslot_providers::CalendarProvider;

use crate::busy_store::BusyConfigStore;
use crate::cache::{CacheKey, EventCache};
use crate::store::{StateStore, StoredWindow};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base interval between passes.
    pub period: Duration,
    /// Concurrent calendar syncs per pass.
    pub max_concurrent: usize,
    /// Backoff added per consecutive error.
    pub backoff_step: Duration,
    /// Cap on the error backoff.
    pub max_backoff: Duration,
    /// Days behind now the sync window starts.
    pub lookbehind_days: i64,
    /// Days ahead of now the sync window ends.
    pub lookahead_days: i64,
    /// TTL of the durable entries the scheduler writes.
    pub durable_ttl: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(300),
            max_concurrent: 3,
            backoff_step: Duration::from_secs(5 * 60),
            max_backoff: Duration::from_secs(60 * 60),
            lookbehind_days: 1,
            lookahead_days: 60,
            durable_ttl: Duration::from_secs(60 * 60),
        }
    }
}

impl SyncConfig {
    /// The backoff for a calendar with `consecutive_errors` failures:
    /// `min(errors * step, max)`.
    pub fn backoff_delay(&self, consecutive_errors: u32) -> Duration {
        if consecutive_errors == 0 {
            return Duration::ZERO;
        }
        self.backoff_step
            .saturating_mul(consecutive_errors)
            .min(self.max_backoff)
    }

    /// The window one sync pass covers, relative to `now`.
    pub fn sync_window(&self, now: DateTime<Utc>) -> TimeWindow {
        TimeWindow::new(
            now - chrono::Duration::days(self.lookbehind_days),
            now + chrono::Duration::days(self.lookahead_days),
        )
    }
}

/// Per-calendar sync bookkeeping, persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncState {
    /// Last successful sync; `None` means never synced.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Process-wide exclusion gate; never persisted.
    #[serde(skip)]
    pub is_syncing: bool,
    /// Failures since the last success.
    pub consecutive_errors: u32,
    /// Earliest next attempt; `None` means due immediately.
    pub next_sync_at: Option<DateTime<Utc>>,
    /// Last failure message, for diagnostics.
    pub last_error: Option<String>,
}

impl SyncState {
    /// Whether this calendar should be synced at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.is_syncing && self.next_sync_at.is_none_or(|t| t <= now)
    }

    /// Records a successful sync.
    pub fn record_success(&mut self, now: DateTime<Utc>, period: Duration) {
        self.last_sync_at = Some(now);
        self.consecutive_errors = 0;
        self.last_error = None;
        self.next_sync_at = Some(now + chrono::Duration::from_std(period).unwrap_or_default());
    }

    /// Records a failed sync, pushing the next attempt out.
    pub fn record_failure(
        &mut self,
        now: DateTime<Utc>,
        error: impl Into<String>,
        config: &SyncConfig,
    ) {
        self.consecutive_errors += 1;
        self.last_error = Some(error.into());
        let backoff = config.backoff_delay(self.consecutive_errors);
        self.next_sync_at = Some(now + chrono::Duration::from_std(backoff).unwrap_or_default());
    }
}

/// Commands accepted by a running scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    /// Run a pass immediately.
    SyncNow,
    /// Clear all bookkeeping, then run a pass over everything.
    FullResync,
    /// Stop the scheduler loop.
    Stop,
}

/// Shared sync-state map, keyed `<provider>/<calendar id>`.
pub type SharedSyncStates = Arc<RwLock<BTreeMap<String, SyncState>>>;

/// The background sync scheduler.
pub struct SyncScheduler {
    config: SyncConfig,
    providers: Vec<Arc<dyn CalendarProvider>>,
    states: SharedSyncStates,
    store: Arc<StateStore>,
    cache: Arc<Mutex<EventCache>>,
    busy: Arc<BusyConfigStore>,
    command_tx: mpsc::Sender<SyncCommand>,
    command_rx: Option<mpsc::Receiver<SyncCommand>>,
}

impl SyncScheduler {
    /// Creates a scheduler, seeding its state map from the durable store.
    pub async fn new(
        config: SyncConfig,
        providers: Vec<Arc<dyn CalendarProvider>>,
        store: Arc<StateStore>,
        cache: Arc<Mutex<EventCache>>,
        busy: Arc<BusyConfigStore>,
    ) -> Self {
        let seeded = store.sync_states().await;
        let (command_tx, command_rx) = mpsc::channel(16);
        Self {
            config,
            providers,
            states: Arc::new(RwLock::new(seeded)),
            store,
            cache,
            busy,
            command_tx,
            command_rx: Some(command_rx),
        }
    }

    /// Returns a handle for commands and state snapshots.
    pub fn handle(&self) -> SyncHandle {
        SyncHandle {
            command_tx: self.command_tx.clone(),
            states: self.states.clone(),
        }
    }

    /// Runs the scheduler loop until stopped. The first pass starts
    /// immediately.
    pub async fn run(mut self) {
        let mut command_rx = self.command_rx.take().expect("run called twice");
        let mut ticker = tokio::time::interval(self.config.period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            period_secs = self.config.period.as_secs(),
            max_concurrent = self.config.max_concurrent,
            "sync scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_pass().await;
                }
                command = command_rx.recv() => {
                    match command {
                        Some(SyncCommand::SyncNow) => {
                            debug!("immediate sync requested");
                            self.run_pass().await;
                        }
                        Some(SyncCommand::FullResync) => {
                            self.force_resync().await;
                            self.run_pass().await;
                        }
                        Some(SyncCommand::Stop) | None => {
                            info!("sync scheduler stopping");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// One scheduler pass: scan, claim due calendars, sync them with
    /// bounded concurrency, record outcomes.
    async fn run_pass(&self) {
        let now = Utc::now();

        let evicted = self.cache.lock().await.evict_expired();
        if evicted > 0 {
            debug!(evicted, "evicted expired cache entries");
        }

        let listings = join_all(self.providers.iter().map(|provider| async move {
            (provider.clone(), provider.list_calendars().await)
        }))
        .await;

        // Claim due calendars under the state lock; `is_syncing` is the
        // exclusion gate against overlapping passes.
        let mut due: Vec<(Arc<dyn CalendarProvider>, String, String)> = Vec::new();
        {
            let mut states = self.states.write().await;
            for (provider, listing) in listings {
                let calendars = match listing {
                    Ok(calendars) => calendars,
                    Err(error) => {
                        warn!(provider = %provider.kind(), error = %error, "calendar listing failed, skipping provider this pass");
                        continue;
                    }
                };
                for calendar in calendars {
                    let key = format!("{}/{}", provider.kind(), calendar.id);
                    let state = states.entry(key.clone()).or_default();
                    if state.is_due(now) {
                        state.is_syncing = true;
                        due.push((provider.clone(), calendar.id, key));
                    }
                }
            }
        }

        if due.is_empty() {
            debug!("no calendars due");
            return;
        }
        info!(count = due.len(), "sync pass starting");

        let window = self.config.sync_window(now);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let rules = self.busy.get().await;

        let results = join_all(due.into_iter().map(|(provider, calendar_id, key)| {
            let semaphore = semaphore.clone();
            let rules = rules.clone();
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("sync semaphore is never closed");
                let outcome = provider
                    .fetch_calendar(&calendar_id, window)
                    .await
                    .map(|raw_events| {
                        let mut occurrences: Vec<_> = raw_events
                            .iter()
                            .flat_map(|raw| expand(raw, &window))
                            .collect();
                        rules.classify_all(&mut occurrences);
                        occurrences.sort_by_key(|occ| occ.start);
                        occurrences
                    });
                (key, outcome)
            }
        }))
        .await;

        for (key, outcome) in results {
            let finished_at = Utc::now();
            let snapshot = {
                let mut states = self.states.write().await;
                let state = states.entry(key.clone()).or_default();
                state.is_syncing = false;
                match &outcome {
                    Ok(_) => state.record_success(finished_at, self.config.period),
                    Err(error) => state.record_failure(finished_at, error.to_string(), &self.config),
                }
                state.clone()
            };

            match outcome {
                Ok(occurrences) => {
                    let scope = format!("sync/{key}");
                    debug!(key = %key, count = occurrences.len(), "calendar synced");
                    self.cache.lock().await.insert_with_ttl(
                        CacheKey::new(scope.clone(), window),
                        occurrences.clone(),
                        self.config.durable_ttl,
                    );
                    self.store
                        .upsert_window(StoredWindow {
                            scope,
                            window,
                            fetched_at: finished_at,
                            ttl_seconds: self.config.durable_ttl.as_secs(),
                            occurrences,
                        })
                        .await;
                }
                Err(error) => {
                    warn!(key = %key, error = %error, "calendar sync failed");
                }
            }
            self.store.put_sync_state(&key, snapshot).await;
        }
    }

    /// Clears every calendar's bookkeeping so the next pass treats it as
    /// never-synced. Calendars mid-sync keep their exclusion flag.
    async fn force_resync(&self) {
        let snapshot = {
            let mut states = self.states.write().await;
            for state in states.values_mut() {
                let mid_sync = state.is_syncing;
                *state = SyncState {
                    is_syncing: mid_sync,
                    ..SyncState::default()
                };
            }
            states.clone()
        };
        self.store.replace_sync_states(snapshot).await;
        info!("full resync forced");
    }
}

/// Handle for a running scheduler.
#[derive(Clone)]
pub struct SyncHandle {
    command_tx: mpsc::Sender<SyncCommand>,
    states: SharedSyncStates,
}

impl SyncHandle {
    /// Requests an immediate pass. Returns false if the scheduler is gone.
    pub async fn sync_now(&self) -> bool {
        self.command_tx.send(SyncCommand::SyncNow).await.is_ok()
    }

    /// Requests a full resync. Returns false if the scheduler is gone.
    pub async fn full_resync(&self) -> bool {
        self.command_tx.send(SyncCommand::FullResync).await.is_ok()
    }

    /// Stops the scheduler.
    pub async fn stop(&self) {
        let _ = self.command_tx.send(SyncCommand::Stop).await;
    }

    /// Snapshot of every calendar's sync state.
    pub async fn states(&self) -> BTreeMap<String, SyncState> {
        self.states.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openslot_core::{ProviderKind, RawEvent};
    use openslot_providers::{
        BoxFuture, CalendarInfo, ErrorProvider, ProviderError, ProviderResult,
    };

    struct OneCalendarProvider;

    impl CalendarProvider for OneCalendarProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Rest
        }

        fn list_calendars(&self) -> BoxFuture<'_, ProviderResult<Vec<CalendarInfo>>> {
            Box::pin(async { Ok(vec![CalendarInfo::new("cal-1", "Primary")]) })
        }

        fn fetch_calendar<'a>(
            &'a self,
            calendar_id: &'a str,
            window: TimeWindow,
        ) -> BoxFuture<'a, ProviderResult<Vec<RawEvent>>> {
            let start = window.start + chrono::Duration::hours(1);
            let event = RawEvent::new("Synced", start, calendar_id, ProviderKind::Rest)
                .with_uid("evt-1");
            Box::pin(async move { Ok(vec![event]) })
        }
    }

    async fn scheduler_with(
        providers: Vec<Arc<dyn CalendarProvider>>,
        dir: &tempfile::TempDir,
    ) -> SyncScheduler {
        let store = Arc::new(StateStore::open(dir.path().join("state.json")));
        let cache = Arc::new(Mutex::new(EventCache::default()));
        let busy = Arc::new(BusyConfigStore::new(dir.path().join("busy.json")));
        SyncScheduler::new(SyncConfig::default(), providers, store, cache, busy).await
    }

    #[test]
    fn backoff_grows_linearly_and_caps_at_one_hour() {
        let config = SyncConfig::default();
        assert_eq!(config.backoff_delay(0), Duration::ZERO);
        assert_eq!(config.backoff_delay(1), Duration::from_secs(5 * 60));
        assert_eq!(config.backoff_delay(3), Duration::from_secs(15 * 60));
        assert_eq!(config.backoff_delay(12), Duration::from_secs(60 * 60));
        assert_eq!(config.backoff_delay(50), Duration::from_secs(60 * 60));
    }

    #[test]
    fn state_due_logic() {
        let now = Utc::now();
        let mut state = SyncState::default();
        assert!(state.is_due(now));

        state.is_syncing = true;
        assert!(!state.is_due(now));

        state.is_syncing = false;
        state.next_sync_at = Some(now + chrono::Duration::minutes(5));
        assert!(!state.is_due(now));
        assert!(state.is_due(now + chrono::Duration::minutes(6)));
    }

    #[test]
    fn success_resets_errors_failure_pushes_out() {
        let config = SyncConfig::default();
        let now = Utc::now();
        let mut state = SyncState::default();

        state.record_failure(now, "boom", &config);
        state.record_failure(now, "boom again", &config);
        assert_eq!(state.consecutive_errors, 2);
        assert_eq!(
            state.next_sync_at,
            Some(now + chrono::Duration::minutes(10))
        );
        assert!(state.last_error.as_deref().unwrap().contains("boom"));

        state.record_success(now, config.period);
        assert_eq!(state.consecutive_errors, 0);
        assert!(state.last_error.is_none());
        assert_eq!(state.last_sync_at, Some(now));
    }

    #[tokio::test]
    async fn pass_syncs_due_calendars_into_store_and_cache() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_with(vec![Arc::new(OneCalendarProvider)], &dir).await;

        scheduler.run_pass().await;

        let states = scheduler.states.read().await;
        let state = states.get("rest/cal-1").expect("state recorded");
        assert!(state.last_sync_at.is_some());
        assert!(!state.is_syncing);
        assert_eq!(state.consecutive_errors, 0);
        drop(states);

        assert!(scheduler.store.window("sync/rest/cal-1").await.is_some());
        assert_eq!(scheduler.cache.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn failing_calendar_backs_off_and_stays_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let broken: Arc<dyn CalendarProvider> = Arc::new(ErrorProvider::new(
            ProviderKind::CalDav,
            ProviderError::timeout("request timed out"),
        ));
        let scheduler = scheduler_with(vec![broken], &dir).await;

        // Listing itself fails, so no state entries are created and
        // nothing panics or propagates.
        scheduler.run_pass().await;
        assert!(scheduler.states.read().await.is_empty());
    }

    #[tokio::test]
    async fn fetch_failure_updates_bookkeeping() {
        struct ListsButFailsFetch;
        impl CalendarProvider for ListsButFailsFetch {
            fn kind(&self) -> ProviderKind {
                ProviderKind::CalDav
            }
            fn list_calendars(&self) -> BoxFuture<'_, ProviderResult<Vec<CalendarInfo>>> {
                Box::pin(async { Ok(vec![CalendarInfo::new("cal-x", "X")]) })
            }
            fn fetch_calendar<'a>(
                &'a self,
                _calendar_id: &'a str,
                _window: TimeWindow,
            ) -> BoxFuture<'a, ProviderResult<Vec<RawEvent>>> {
                Box::pin(async { Err(ProviderError::server("remote exploded")) })
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_with(vec![Arc::new(ListsButFailsFetch)], &dir).await;

        scheduler.run_pass().await;
        let states = scheduler.states.read().await;
        let state = states.get("caldav/cal-x").unwrap();
        assert_eq!(state.consecutive_errors, 1);
        assert!(state.next_sync_at.is_some());
        assert!(state.last_sync_at.is_none());
        drop(states);

        // Immediately after, the calendar is inside its backoff and a new
        // pass skips it.
        scheduler.run_pass().await;
        let states = scheduler.states.read().await;
        assert_eq!(states.get("caldav/cal-x").unwrap().consecutive_errors, 1);
    }

    #[tokio::test]
    async fn full_resync_clears_bookkeeping() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_with(vec![Arc::new(OneCalendarProvider)], &dir).await;

        scheduler.run_pass().await;
        assert!(
            scheduler.states.read().await["rest/cal-1"]
                .last_sync_at
                .is_some()
        );

        scheduler.force_resync().await;
        let states = scheduler.states.read().await;
        let state = &states["rest/cal-1"];
        assert!(state.last_sync_at.is_none());
        assert!(state.next_sync_at.is_none());
        assert_eq!(state.consecutive_errors, 0);
    }

    #[tokio::test]
    async fn handle_commands_drive_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_with(vec![Arc::new(OneCalendarProvider)], &dir).await;
        let handle = scheduler.handle();

        let task = tokio::spawn(scheduler.run());

        // The startup tick runs a first pass.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.states().await.contains_key("rest/cal-1"));

        assert!(handle.sync_now().await);
        assert!(handle.full_resync().await);
        handle.stop().await;
        task.await.unwrap();
    }
}
