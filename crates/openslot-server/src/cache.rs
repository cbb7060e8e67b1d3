//! Merged-occurrence cache with TTL and stale-while-revalidate.
//!
//! Keys are exact-match on `(scope, window)`; there is no partial-window
//! overlap logic. A fresh entry serves directly; an entry past its TTL but within
//! the stale grace serves the old value while exactly one caller is told
//! to kick off a refresh; anything older is a miss.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use openslot_core::{Occurrence, TimeWindow};

/// Cache key: scope plus the exact normalized window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub scope: String,
    pub window: TimeWindow,
}

impl CacheKey {
    /// Creates a new cache key.
    pub fn new(scope: impl Into<String>, window: TimeWindow) -> Self {
        Self {
            scope: scope.into(),
            window,
        }
    }
}

/// One cached occurrence list.
#[derive(Debug, Clone)]
struct CacheEntry {
    occurrences: Vec<Occurrence>,
    fetched_at: DateTime<Utc>,
    expires_at: Instant,
    stale_until: Instant,
    /// Set while a background refresh is in flight, so only one caller
    /// triggers it.
    refreshing: bool,
}

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// Within TTL.
    Fresh(Vec<Occurrence>),
    /// Expired but within the stale grace; `refresh_needed` is true for
    /// exactly one caller per refresh cycle.
    Stale {
        occurrences: Vec<Occurrence>,
        refresh_needed: bool,
    },
    /// Nothing usable; the caller must run the pipeline synchronously.
    Miss,
}

/// The occurrence cache.
#[derive(Debug)]
pub struct EventCache {
    default_ttl: Duration,
    stale_grace: Duration,
    entries: HashMap<CacheKey, CacheEntry>,
}

impl Default for EventCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(300), Duration::from_secs(300))
    }
}

impl EventCache {
    /// Creates a cache with the given TTL and stale-serve grace.
    pub fn new(default_ttl: Duration, stale_grace: Duration) -> Self {
        Self {
            default_ttl,
            stale_grace,
            entries: HashMap::new(),
        }
    }

    /// Returns the default TTL.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Looks up a key, applying the stale-while-revalidate policy.
    pub fn lookup(&mut self, key: &CacheKey) -> CacheLookup {
        let now = Instant::now();
        let Some(entry) = self.entries.get_mut(key) else {
            return CacheLookup::Miss;
        };

        if now < entry.expires_at {
            trace!(scope = %key.scope, "cache hit");
            return CacheLookup::Fresh(entry.occurrences.clone());
        }

        if now < entry.stale_until {
            let refresh_needed = !entry.refreshing;
            entry.refreshing = true;
            debug!(scope = %key.scope, refresh_needed, "serving stale cache entry");
            return CacheLookup::Stale {
                occurrences: entry.occurrences.clone(),
                refresh_needed,
            };
        }

        CacheLookup::Miss
    }

    /// Inserts or replaces an entry with the default TTL.
    pub fn insert(&mut self, key: CacheKey, occurrences: Vec<Occurrence>) {
        self.insert_with_ttl(key, occurrences, self.default_ttl);
    }

    /// Inserts or replaces an entry with a custom TTL.
    pub fn insert_with_ttl(
        &mut self,
        key: CacheKey,
        occurrences: Vec<Occurrence>,
        ttl: Duration,
    ) {
        let now = Instant::now();
        debug!(scope = %key.scope, count = occurrences.len(), ttl_secs = ttl.as_secs(), "cache insert");
        self.entries.insert(
            key,
            CacheEntry {
                occurrences,
                fetched_at: Utc::now(),
                expires_at: now + ttl,
                stale_until: now + ttl + self.stale_grace,
                refreshing: false,
            },
        );
    }

    /// Clears the refresh flag after a failed background refresh, so a
    /// later reader can retry.
    pub fn abort_refresh(&mut self, key: &CacheKey) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.refreshing = false;
        }
    }

    /// When the entry was last filled.
    pub fn fetched_at(&self, key: &CacheKey) -> Option<DateTime<Utc>> {
        self.entries.get(key).map(|e| e.fetched_at)
    }

    /// Removes entries past their stale grace. Returns how many.
    pub fn evict_expired(&mut self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|key, entry| {
            let keep = now < entry.stale_until;
            if !keep {
                trace!(scope = %key.scope, "evicting expired cache entry");
            }
            keep
        });
        before - self.entries.len()
    }

    /// Number of entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
