//! Server configuration.
//!
//! Loaded from one JSON file; every field has a default so a missing or
//! partial file still yields a runnable service. The business timezone is
//! a fixed offset, per the single-practice deployment model.

use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use tracing::warn;

use openslot_core::{BusinessHours, DayHours};

use crate::sync::SyncConfig;

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Address the HTTP server binds to.
    pub bind_addr: SocketAddr,

    /// Business timezone as minutes east of UTC.
    pub business_offset_minutes: i32,

    /// Business hours keyed by weekday name (`mon` … `sun`).
    pub business_hours: BTreeMap<String, DayHours>,

    /// TTL of request-path cache entries.
    pub cache_ttl_seconds: u64,

    /// How long an expired cache entry may still be served stale.
    pub stale_grace_seconds: u64,

    /// Directory for persisted state; defaults to the platform data dir.
    pub state_dir: Option<PathBuf>,

    /// Background sync settings.
    pub sync: SyncSettings,

    /// CalDAV provider, when configured.
    pub caldav: Option<CalDavSettings>,

    /// Token REST provider, when configured.
    pub rest: Option<RestSettings>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let mut business_hours = BTreeMap::new();
        for day in ["mon", "tue", "wed", "thu", "fri"] {
            business_hours.insert(
                day.to_string(),
                DayHours {
                    open_minutes: 9 * 60,
                    close_minutes: 17 * 60,
                },
            );
        }
        Self {
            bind_addr: "127.0.0.1:8743".parse().expect("valid default address"),
            business_offset_minutes: 0,
            business_hours,
            cache_ttl_seconds: 300,
            stale_grace_seconds: 300,
            state_dir: None,
            sync: SyncSettings::default(),
            caldav: None,
            rest: None,
        }
    }
}

/// Background sync settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncSettings {
    pub period_seconds: u64,
    pub max_concurrent: usize,
    pub lookbehind_days: i64,
    pub lookahead_days: i64,
    pub durable_ttl_seconds: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            period_seconds: 300,
            max_concurrent: 3,
            lookbehind_days: 1,
            lookahead_days: 60,
            durable_ttl_seconds: 3600,
        }
    }
}

/// CalDAV provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalDavSettings {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_true")]
    pub verify_tls: bool,
}

/// Token REST provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestSettings {
    pub base_url: String,
    pub token: String,
}

fn default_true() -> bool {
    true
}

impl ServerConfig {
    /// Loads the configuration from a JSON file.
    pub fn load(path: &Path) -> io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Loads from `path` when given, falling back to defaults with a
    /// warning when the file is absent or unreadable.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        match path {
            Some(path) => Self::load(path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "config unreadable, using defaults");
                Self::default()
            }),
            None => Self::default(),
        }
    }

    /// The business timezone as a fixed offset. An out-of-range value
    /// falls back to UTC.
    pub fn business_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.business_offset_minutes * 60)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("UTC offset is valid"))
    }

    /// The business-hours table. Unknown weekday keys are ignored with a
    /// warning.
    pub fn hours(&self) -> BusinessHours {
        use chrono::Weekday;
        let mut hours = BusinessHours::new();
        for (key, day) in &self.business_hours {
            let weekday = match key.to_ascii_lowercase().as_str() {
                "mon" => Weekday::Mon,
                "tue" => Weekday::Tue,
                "wed" => Weekday::Wed,
                "thu" => Weekday::Thu,
                "fri" => Weekday::Fri,
                "sat" => Weekday::Sat,
                "sun" => Weekday::Sun,
                other => {
                    warn!(key = %other, "ignoring unknown weekday in business hours");
                    continue;
                }
            };
            hours = hours.with_day(weekday, day.open_minutes, day.close_minutes);
        }
        hours
    }

    /// Request-cache TTL.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    /// Stale-serve grace.
    pub fn stale_grace(&self) -> Duration {
        Duration::from_secs(self.stale_grace_seconds)
    }

    /// The scheduler configuration derived from these settings.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            period: Duration::from_secs(self.sync.period_seconds),
            max_concurrent: self.sync.max_concurrent,
            lookbehind_days: self.sync.lookbehind_days,
            lookahead_days: self.sync.lookahead_days,
            durable_ttl: Duration::from_secs(self.sync.durable_ttl_seconds),
            ..SyncConfig::default()
        }
    }

    /// The directory persisted state lives in.
    pub fn resolved_state_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.state_dir {
            return dir.clone();
        }
        dirs::data_dir()
            .map(|d| d.join("openslot"))
            .unwrap_or_else(|| PathBuf::from("."))
    }
}
