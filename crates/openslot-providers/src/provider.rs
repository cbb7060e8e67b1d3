//! The `CalendarProvider` trait.
//!
//! One implementation per external system. The merge engine treats every
//! `(provider, calendar)` pair as an independent failure domain, so the
//! trait exposes calendar enumeration and a per-calendar fetch instead of
//! one bulk call.

use std::future::Future;
use std::pin::Pin;

use openslot_core::{ProviderKind, RawEvent, TimeWindow};

use crate::error::{ProviderError, ProviderResult};

/// A boxed future for async trait methods, keeping the trait object-safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Information about one calendar a provider exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarInfo {
    /// Unique identifier within the provider (href or API id).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Provider-supplied display color, if any.
    pub color: Option<String>,
}

impl CalendarInfo {
    /// Creates a new `CalendarInfo`.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            color: None,
        }
    }

    /// Builder: set the display color.
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }
}

/// The abstraction every calendar backend implements.
///
/// Implementations must be `Send + Sync`; fetches must carry a bounded
/// timeout so one slow remote cannot stall a merge, and must translate
/// their native event shapes to [`RawEvent`] before returning.
pub trait CalendarProvider: Send + Sync {
    /// Which provider family this is.
    fn kind(&self) -> ProviderKind;

    /// Lists the calendars this provider can fetch.
    fn list_calendars(&self) -> BoxFuture<'_, ProviderResult<Vec<CalendarInfo>>>;

    /// Fetches the raw events of one calendar inside the window.
    fn fetch_calendar<'a>(
        &'a self,
        calendar_id: &'a str,
        window: TimeWindow,
    ) -> BoxFuture<'a, ProviderResult<Vec<RawEvent>>>;
}

/// A provider that fails every call with a fixed error.
///
/// Stands in for a backend that could not be constructed, and doubles as
/// the failure-isolation fixture in merge tests.
#[derive(Debug)]
pub struct ErrorProvider {
    kind: ProviderKind,
    code: crate::error::ProviderErrorCode,
    message: String,
}

impl ErrorProvider {
    /// Creates a new error provider.
    pub fn new(kind: ProviderKind, error: ProviderError) -> Self {
        Self {
            kind,
            code: error.code(),
            message: error.message().to_string(),
        }
    }

    fn error(&self) -> ProviderError {
        ProviderError::new(self.code, self.message.clone()).with_provider(self.kind.as_str())
    }
}

impl CalendarProvider for ErrorProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn list_calendars(&self) -> BoxFuture<'_, ProviderResult<Vec<CalendarInfo>>> {
        let error = self.error();
        Box::pin(async move { Err(error) })
    }

    fn fetch_calendar<'a>(
        &'a self,
        _calendar_id: &'a str,
        _window: TimeWindow,
    ) -> BoxFuture<'a, ProviderResult<Vec<RawEvent>>> {
        let error = self.error();
        Box::pin(async move { Err(error) })
    }
}
