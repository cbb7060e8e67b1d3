//! Token-based REST calendar provider.
//!
//! Talks to a JSON calendar API with bearer-token auth. Events arrive as
//! structured objects carrying a native `recurrence` string array; the
//! translation to [`openslot_core::RawEvent`] happens entirely inside this
//! module.

mod client;
mod config;
mod provider;

pub use config::RestConfig;
pub use provider::RestProvider;
