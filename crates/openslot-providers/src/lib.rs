//! CalendarProvider trait and implementations (CalDAV, token REST).
//!
//! Everything provider-specific ends at this crate's boundary: both
//! adapters emit [`openslot_core::RawEvent`] and the same error taxonomy,
//! so the merge pipeline never sees a native wire shape.

pub mod caldav;
pub mod error;
pub mod ical;
pub mod provider;
pub mod rest;

pub use caldav::{CalDavConfig, CalDavProvider};
pub use error::{ProviderError, ProviderErrorCode, ProviderResult};
pub use ical::parse_calendar_text;
pub use provider::{BoxFuture, CalendarInfo, CalendarProvider, ErrorProvider};
pub use rest::{RestConfig, RestProvider};
