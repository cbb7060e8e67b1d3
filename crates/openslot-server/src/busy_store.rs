//! The busy-configuration store.
//!
//! Wraps [`BusyRules`] with an explicit lifecycle: lazily loaded from its
//! JSON file on first use, cached in process, persisted on every
//! mutation. Mutations are read-modify-persist under one write lock;
//! concurrent writers racing on the same toggle are last-write-wins by
//! design, no stronger guarantee is provided.

use std::fs;
use std::io;
use std::path::PathBuf;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use openslot_core::BusyRules;

/// File-backed, lazily loaded busy configuration.
#[derive(Debug)]
pub struct BusyConfigStore {
    path: PathBuf,
    rules: RwLock<Option<BusyRules>>,
}

impl BusyConfigStore {
    /// Creates a store over the given file. Nothing is read until the
    /// first access.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            rules: RwLock::new(None),
        }
    }

    /// Returns the current rules, loading them on first use.
    pub async fn get(&self) -> BusyRules {
        if let Some(rules) = self.rules.read().await.as_ref() {
            return rules.clone();
        }

        let mut guard = self.rules.write().await;
        // Another task may have loaded while we waited for the lock.
        if let Some(rules) = guard.as_ref() {
            return rules.clone();
        }
        let loaded = self.load_from_disk();
        *guard = Some(loaded.clone());
        loaded
    }

    /// Applies a mutation and persists the result. Returns the new rules.
    pub async fn update<F>(&self, mutate: F) -> io::Result<BusyRules>
    where
        F: FnOnce(&mut BusyRules),
    {
        let mut guard = self.rules.write().await;
        let mut rules = match guard.take() {
            Some(rules) => rules,
            None => self.load_from_disk(),
        };
        mutate(&mut rules);
        self.write_atomic(&rules)?;
        *guard = Some(rules.clone());
        Ok(rules)
    }

    fn load_from_disk(&self) -> BusyRules {
        match fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), error = %e, "busy config unreadable, using defaults");
                BusyRules::default()
            }),
            Err(_) => BusyRules::default(),
        }
    }

    fn write_atomic(&self, rules: &BusyRules) -> io::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(rules)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, &self.path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600));
        }

        debug!(path = %self.path.display(), "busy config persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn defaults_when_file_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = BusyConfigStore::new(dir.path().join("busy.json"));
        let rules = store.get().await;
        assert!(rules.busy_calendar_ids.is_empty());
        assert!(rules.whitelist_ids.is_empty());
    }

    #[tokio::test]
    async fn update_persists_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("busy.json");

        {
            let store = BusyConfigStore::new(&path);
            store
                .update(|rules| {
                    rules.busy_calendar_ids.insert("work".to_string());
                    rules
                        .calendar_colors
                        .insert("work".to_string(), "#112233".to_string());
                })
                .await
                .unwrap();
        }

        let reopened = BusyConfigStore::new(&path);
        let rules = reopened.get().await;
        assert!(rules.busy_calendar_ids.contains("work"));
        assert_eq!(rules.color_for("work"), Some("#112233"));
    }

    #[tokio::test]
    async fn later_update_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = BusyConfigStore::new(dir.path().join("busy.json"));

        store
            .update(|rules| {
                rules.whitelist_ids.insert("a".to_string());
            })
            .await
            .unwrap();
        store
            .update(|rules| {
                rules.whitelist_ids.remove("a");
                rules.whitelist_ids.insert("b".to_string());
            })
            .await
            .unwrap();

        let rules = store.get().await;
        assert!(!rules.whitelist_ids.contains("a"));
        assert!(rules.whitelist_ids.contains("b"));
    }

    #[tokio::test]
    async fn corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("busy.json");
        fs::write(&path, "][").unwrap();

        let store = BusyConfigStore::new(&path);
        assert_eq!(store.get().await, BusyRules::default());
    }
}
