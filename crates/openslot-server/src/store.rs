//! Durable JSON state.
//!
//! One document holds the per-calendar sync bookkeeping, the windows the
//! scheduler has synced (with expiry so stale data is pruned at load and
//! save), and the internally scheduled meetings the availability engine
//! blocks against. Writes go through a temp file and rename so a crash
//! never leaves a half-written document.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use openslot_core::{Occurrence, TimeWindow};

use crate::sync::SyncState;

/// A synced window as persisted by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredWindow {
    pub scope: String,
    pub window: TimeWindow,
    pub fetched_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    pub occurrences: Vec<Occurrence>,
}

impl StoredWindow {
    /// Whether the entry is past its TTL at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.fetched_at + Duration::seconds(self.ttl_seconds as i64)
    }
}

/// A self-scheduled appointment that always blocks availability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalMeeting {
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// The persisted document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PersistedState {
    pub sync: std::collections::BTreeMap<String, SyncState>,
    pub windows: Vec<StoredWindow>,
    pub internal_meetings: Vec<InternalMeeting>,
}

/// File-backed store for [`PersistedState`].
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    state: Mutex<PersistedState>,
}

impl StateStore {
    /// Opens the store, loading and pruning any existing document. A
    /// missing or unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut state = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "state file unreadable, starting empty");
                PersistedState::default()
            }),
            Err(_) => PersistedState::default(),
        };
        prune(&mut state);
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    /// The backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the sync bookkeeping.
    pub async fn sync_states(&self) -> std::collections::BTreeMap<String, SyncState> {
        self.state.lock().await.sync.clone()
    }

    /// Replaces one calendar's sync state and persists.
    pub async fn put_sync_state(&self, key: impl Into<String>, sync: SyncState) {
        let mut state = self.state.lock().await;
        state.sync.insert(key.into(), sync);
        self.persist(&state);
    }

    /// Replaces the whole sync map and persists (used by full resync).
    pub async fn replace_sync_states(
        &self,
        sync: std::collections::BTreeMap<String, SyncState>,
    ) {
        let mut state = self.state.lock().await;
        state.sync = sync;
        self.persist(&state);
    }

    /// Upserts one synced window (one entry per scope; the scheduler's
    /// windows shift with the clock), prunes expired entries and persists.
    pub async fn upsert_window(&self, stored: StoredWindow) {
        let mut state = self.state.lock().await;
        state.windows.retain(|w| w.scope != stored.scope);
        state.windows.push(stored);
        prune(&mut state);
        self.persist(&state);
    }

    /// The still-valid synced window for a scope, if any.
    pub async fn window(&self, scope: &str) -> Option<StoredWindow> {
        let now = Utc::now();
        self.state
            .lock()
            .await
            .windows
            .iter()
            .find(|w| w.scope == scope && !w.is_expired(now))
            .cloned()
    }

    /// Every internal meeting overlapping the window.
    pub async fn internal_meetings_in(&self, window: TimeWindow) -> Vec<InternalMeeting> {
        self.state
            .lock()
            .await
            .internal_meetings
            .iter()
            .filter(|m| window.overlaps(m.start, m.end))
            .cloned()
            .collect()
    }

    /// Adds an internal meeting and persists.
    pub async fn add_internal_meeting(&self, meeting: InternalMeeting) {
        let mut state = self.state.lock().await;
        state.internal_meetings.push(meeting);
        self.persist(&state);
    }

    /// Writes the document atomically. Persistence failures are logged,
    /// never propagated: the in-memory state stays authoritative.
    fn persist(&self, state: &PersistedState) {
        if let Err(error) = self.write_atomic(state) {
            warn!(path = %self.path.display(), error = %error, "failed to persist state");
        }
    }

    fn write_atomic(&self, state: &PersistedState) -> io::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(state)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, &self.path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600));
        }

        debug!(path = %self.path.display(), "state persisted");
        Ok(())
    }
}

/// Drops expired windows.
fn prune(state: &mut PersistedState) {
    let now = Utc::now();
    state.windows.retain(|w| !w.is_expired(now));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use openslot_core::{ProviderKind, RawEvent};

    fn window() -> TimeWindow {
        let start = Utc.with_ymd_and_hms(2025, 2, 3, 0, 0, 0).unwrap();
        TimeWindow::new(start, start + Duration::days(1))
    }

    fn stored(scope: &str, ttl_seconds: u64) -> StoredWindow {
        let start = Utc.with_ymd_and_hms(2025, 2, 3, 10, 0, 0).unwrap();
        let raw = RawEvent::new("Visit", start, "cal-1", ProviderKind::Rest);
        StoredWindow {
            scope: scope.to_string(),
            window: window(),
            fetched_at: Utc::now(),
            ttl_seconds,
            occurrences: vec![Occurrence::from_raw(&raw, start)],
        }
    }

    #[tokio::test]
    async fn roundtrips_through_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        {
            let store = StateStore::open(&path);
            store.upsert_window(stored("sync/caldav/cal-1", 3600)).await;
            store
                .add_internal_meeting(InternalMeeting {
                    title: "Admin block".to_string(),
                    start: Utc.with_ymd_and_hms(2025, 2, 3, 8, 0, 0).unwrap(),
                    end: Utc.with_ymd_and_hms(2025, 2, 3, 9, 0, 0).unwrap(),
                })
                .await;
        }

        let reopened = StateStore::open(&path);
        assert!(reopened.window("sync/caldav/cal-1").await.is_some());
        assert_eq!(reopened.internal_meetings_in(window()).await.len(), 1);
    }

    #[tokio::test]
    async fn expired_windows_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path().join("state.json"));

        let mut expired = stored("old", 60);
        expired.fetched_at = Utc::now() - Duration::hours(2);
        store.upsert_window(expired).await;
        store.upsert_window(stored("fresh", 3600)).await;

        assert!(store.window("old").await.is_none());
        assert!(store.window("fresh").await.is_some());
    }

    #[tokio::test]
    async fn upsert_replaces_same_scope_and_window() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path().join("state.json"));

        store.upsert_window(stored("s", 3600)).await;
        let mut updated = stored("s", 3600);
        updated.occurrences.clear();
        store.upsert_window(updated).await;

        let found = store.window("s").await.unwrap();
        assert!(found.occurrences.is_empty());
    }

    #[tokio::test]
    async fn meetings_outside_the_window_are_not_returned() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path().join("state.json"));
        store
            .add_internal_meeting(InternalMeeting {
                title: "Far future".to_string(),
                start: Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap(),
                end: Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap(),
            })
            .await;
        assert!(store.internal_meetings_in(window()).await.is_empty());
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();
        let store = StateStore::open(&path);
        assert!(store.path().ends_with("state.json"));
    }
}
