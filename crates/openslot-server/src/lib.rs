//! Availability service: merge pipeline, cache, sync scheduler, HTTP API.
//!
//! The pipeline is
//! provider fetch → parse → recurrence expansion → merge/dedup →
//! busy classification → cache → availability/calendar responses,
//! with a background scheduler running the same pipeline on a timer into
//! durable storage.

pub mod busy_store;
pub mod cache;
pub mod config;
pub mod error;
pub mod merge;
pub mod routes;
pub mod state;
pub mod store;
pub mod sync;

pub use busy_store::BusyConfigStore;
pub use cache::{CacheKey, CacheLookup, EventCache};
pub use config::ServerConfig;
pub use error::ApiError;
pub use merge::{CalendarFetchStatus, MergeOutcome, merge_window};
pub use routes::router;
pub use state::{AppInner, AppState, providers_from_config};
pub use store::{InternalMeeting, PersistedState, StateStore, StoredWindow};
pub use sync::{SyncCommand, SyncConfig, SyncHandle, SyncScheduler, SyncState};
