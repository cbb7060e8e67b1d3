//! Shared application state.

use std::ops::Deref;
use std::sync::Arc;

use chrono::FixedOffset;
use tokio::sync::Mutex;
use tracing::{error, info};

use openslot_core::{BusinessHours, ProviderKind};
use openslot_providers::{
    CalDavConfig, CalDavProvider, CalendarProvider, ErrorProvider, ProviderError, RestConfig,
    RestProvider,
};

use crate::busy_store::BusyConfigStore;
use crate::cache::EventCache;
use crate::config::ServerConfig;
use crate::store::StateStore;
use crate::sync::SyncHandle;

/// Everything the HTTP handlers need, cheap to clone.
#[derive(Clone)]
pub struct AppState(Arc<AppInner>);

/// The shared innards behind [`AppState`].
pub struct AppInner {
    pub business_offset: FixedOffset,
    pub business_hours: BusinessHours,
    pub providers: Vec<Arc<dyn CalendarProvider>>,
    pub cache: Arc<Mutex<EventCache>>,
    pub busy: Arc<BusyConfigStore>,
    pub store: Arc<StateStore>,
    pub sync: SyncHandle,
}

impl AppState {
    /// Wraps the shared innards.
    pub fn new(inner: AppInner) -> Self {
        Self(Arc::new(inner))
    }
}

impl Deref for AppState {
    type Target = AppInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Builds the configured providers.
///
/// A provider whose construction fails is replaced with an
/// [`ErrorProvider`] so its calendars show up as per-calendar errors
/// instead of silently vanishing.
pub fn providers_from_config(config: &ServerConfig) -> Vec<Arc<dyn CalendarProvider>> {
    let offset = config.business_offset();
    let mut providers: Vec<Arc<dyn CalendarProvider>> = Vec::new();

    if let Some(ref settings) = config.caldav {
        let built = CalDavConfig::new(&settings.url)
            .map_err(|e| ProviderError::configuration(format!("invalid CalDAV url: {e}")))
            .and_then(|mut caldav| {
                if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
                    caldav = caldav.with_credentials(username, password);
                }
                if !settings.verify_tls {
                    caldav = caldav.with_insecure_tls();
                }
                CalDavProvider::new(caldav, offset)
            });
        match built {
            Ok(provider) => {
                info!(url = %settings.url, "CalDAV provider configured");
                providers.push(Arc::new(provider));
            }
            Err(e) => {
                error!(error = %e, "CalDAV provider failed to initialize");
                providers.push(Arc::new(ErrorProvider::new(ProviderKind::CalDav, e)));
            }
        }
    }

    if let Some(ref settings) = config.rest {
        let built = RestConfig::new(&settings.base_url, &settings.token)
            .map_err(|e| ProviderError::configuration(format!("invalid REST base url: {e}")))
            .and_then(|rest| RestProvider::new(rest, offset));
        match built {
            Ok(provider) => {
                info!(base_url = %settings.base_url, "REST provider configured");
                providers.push(Arc::new(provider));
            }
            Err(e) => {
                error!(error = %e, "REST provider failed to initialize");
                providers.push(Arc::new(ErrorProvider::new(ProviderKind::Rest, e)));
            }
        }
    }

    providers
}
