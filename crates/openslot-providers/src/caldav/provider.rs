//! CalDAV calendar provider implementation.

use chrono::FixedOffset;
use tracing::{debug, info};

use openslot_core::{ProviderKind, RawEvent, TimeWindow};

use crate::error::ProviderResult;
use crate::ical::parse_calendar_text;
use crate::provider::{BoxFuture, CalendarInfo, CalendarProvider};

use super::client::CalDavClient;
use super::config::CalDavConfig;
use super::xml::{
    calendar_query_body, parse_propfind_response, parse_report_response, propfind_calendars_body,
};

/// Fetches events from CalDAV-compatible calendar servers.
pub struct CalDavProvider {
    client: CalDavClient,
    config: CalDavConfig,
    business_offset: FixedOffset,
}

impl CalDavProvider {
    /// Creates a new CalDAV provider.
    ///
    /// `business_offset` anchors date-only and floating-time values found
    /// in the server's calendar objects.
    pub fn new(config: CalDavConfig, business_offset: FixedOffset) -> ProviderResult<Self> {
        let client = CalDavClient::new(config.clone())?;
        Ok(Self {
            client,
            config,
            business_offset,
        })
    }

    /// Discovers calendars under the configured URL.
    ///
    /// When PROPFIND finds no calendar collections, the configured URL is
    /// assumed to be a calendar itself.
    async fn discover_calendars(&self) -> ProviderResult<Vec<CalendarInfo>> {
        let url = self.config.url_str();
        debug!(url = %url, "discovering calendars via PROPFIND");

        let body = propfind_calendars_body();
        let response = self.client.propfind(url, &body, 1).await?;
        let discovered = parse_propfind_response(&response);

        if discovered.is_empty() {
            debug!("no calendar collections found, assuming direct calendar URL");
            return Ok(vec![CalendarInfo::new(url, url)]);
        }

        info!(count = discovered.len(), "discovered calendars");

        Ok(discovered
            .into_iter()
            .map(|c| {
                let id = resolve_href(&self.config.url, &c.href);
                let name = c.display_name.unwrap_or_else(|| c.href.clone());
                CalendarInfo::new(id, name)
            })
            .collect())
    }

    async fn fetch_calendar_events(
        &self,
        calendar_url: &str,
        window: TimeWindow,
    ) -> ProviderResult<Vec<RawEvent>> {
        debug!(
            calendar = %calendar_url,
            start = %window.start,
            end = %window.end,
            "fetching events with REPORT"
        );

        let body = calendar_query_body(window.start, window.end);
        let response = self.client.report(calendar_url, &body).await?;
        let entries = parse_report_response(&response);

        let mut events = Vec::new();
        for entry in entries {
            events.extend(parse_calendar_text(
                &entry.calendar_data,
                calendar_url,
                ProviderKind::CalDav,
                self.business_offset,
            ));
        }

        info!(
            calendar = %calendar_url,
            count = events.len(),
            "fetched and parsed events"
        );
        Ok(events)
    }
}

impl CalendarProvider for CalDavProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::CalDav
    }

    fn list_calendars(&self) -> BoxFuture<'_, ProviderResult<Vec<CalendarInfo>>> {
        Box::pin(async move {
            self.discover_calendars()
                .await
                .map_err(|e| e.with_provider("caldav"))
        })
    }

    fn fetch_calendar<'a>(
        &'a self,
        calendar_id: &'a str,
        window: TimeWindow,
    ) -> BoxFuture<'a, ProviderResult<Vec<RawEvent>>> {
        Box::pin(async move {
            self.fetch_calendar_events(calendar_id, window)
                .await
                .map_err(|e| e.with_provider("caldav"))
        })
    }
}

/// Resolves a relative href against the configured base URL.
fn resolve_href(base: &url::Url, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else {
        base.join(href)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| href.to_string())
    }
}
