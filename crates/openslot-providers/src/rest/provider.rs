//! Token REST calendar provider implementation.

use chrono::FixedOffset;

use openslot_core::{ProviderKind, RawEvent, TimeWindow};

use crate::error::ProviderResult;
use crate::provider::{BoxFuture, CalendarInfo, CalendarProvider};

use super::client::RestClient;
use super::config::RestConfig;

/// Fetches events from the token-based REST calendar API.
pub struct RestProvider {
    client: RestClient,
    business_offset: FixedOffset,
}

impl RestProvider {
    /// Creates a new REST provider.
    pub fn new(config: RestConfig, business_offset: FixedOffset) -> ProviderResult<Self> {
        Ok(Self {
            client: RestClient::new(config)?,
            business_offset,
        })
    }
}

impl CalendarProvider for RestProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Rest
    }

    fn list_calendars(&self) -> BoxFuture<'_, ProviderResult<Vec<CalendarInfo>>> {
        Box::pin(async move {
            let calendars = self
                .client
                .list_calendars()
                .await
                .map_err(|e| e.with_provider("rest"))?;

            Ok(calendars
                .into_iter()
                .map(|c| {
                    let name = if c.summary.is_empty() {
                        c.id.clone()
                    } else {
                        c.summary
                    };
                    let mut info = CalendarInfo::new(c.id, name);
                    if let Some(color) = c.background_color {
                        info = info.with_color(color);
                    }
                    info
                })
                .collect())
        })
    }

    fn fetch_calendar<'a>(
        &'a self,
        calendar_id: &'a str,
        window: TimeWindow,
    ) -> BoxFuture<'a, ProviderResult<Vec<RawEvent>>> {
        Box::pin(async move {
            self.client
                .list_events(calendar_id, window.start, window.end, self.business_offset)
                .await
                .map_err(|e| e.with_provider("rest"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_creation_and_kind() {
        let config = RestConfig::new("https://api.example.com/v1", "secret").unwrap();
        let provider = RestProvider::new(config, FixedOffset::east_opt(0).unwrap()).unwrap();
        assert_eq!(provider.kind(), ProviderKind::Rest);
    }
}
