//! HTTP client for the token REST calendar API.
//!
//! The API returns structured event objects with a native `recurrence`
//! string array (`RRULE:…` / `EXDATE:…` entries); translation to
//! [`RawEvent`] happens here, at the adapter boundary, so nothing
//! provider-specific leaks into the core pipeline.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use openslot_core::{ProviderKind, RawEvent, RecurrenceRule, local_midnight, parse_ical_datetime};

use crate::error::{ProviderError, ProviderResult};

use super::config::RestConfig;

/// REST API client.
#[derive(Debug)]
pub struct RestClient {
    http: reqwest::Client,
    config: RestConfig,
}

/// One page of a calendar listing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarListResponse {
    #[serde(default)]
    items: Vec<ApiCalendar>,
    next_page_token: Option<String>,
}

/// A calendar as the API describes it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCalendar {
    pub id: String,
    #[serde(default)]
    pub summary: String,
    pub background_color: Option<String>,
}

/// One page of an event listing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventListResponse {
    #[serde(default)]
    items: Vec<ApiEvent>,
    next_page_token: Option<String>,
}

/// An event as the API describes it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEvent {
    id: Option<String>,
    #[serde(default)]
    summary: String,
    start: Option<ApiEventTime>,
    end: Option<ApiEventTime>,
    #[serde(default)]
    recurrence: Vec<String>,
    status: Option<String>,
}

/// Either a datetime or an all-day date.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEventTime {
    date_time: Option<DateTime<Utc>>,
    date: Option<NaiveDate>,
}

impl ApiEventTime {
    fn to_utc(&self, business_offset: FixedOffset) -> Option<DateTime<Utc>> {
        self.date_time
            .or_else(|| self.date.map(|d| local_midnight(d, business_offset)))
    }
}

impl RestClient {
    /// Creates a new client.
    pub fn new(config: RestConfig) -> ProviderResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                ProviderError::configuration(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self { http, config })
    }

    /// Lists all calendars, following pagination.
    pub async fn list_calendars(&self) -> ProviderResult<Vec<ApiCalendar>> {
        let url = format!("{}/calendars", self.config.base_str());
        let mut calendars = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.http.get(&url).bearer_auth(&self.config.token);
            if let Some(ref token) = page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }
            let page: CalendarListResponse = send_json(request).await?;
            calendars.extend(page.items);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(count = calendars.len(), "listed REST calendars");
        Ok(calendars)
    }

    /// Lists the events of one calendar inside `[start, end)`, translated
    /// to raw events.
    pub async fn list_events(
        &self,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        business_offset: FixedOffset,
    ) -> ProviderResult<Vec<RawEvent>> {
        let url = format!(
            "{}/calendars/{}/events",
            self.config.base_str(),
            urlencoding::encode(calendar_id)
        );

        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(&url)
                .bearer_auth(&self.config.token)
                .query(&[
                    ("timeMin", start.to_rfc3339()),
                    ("timeMax", end.to_rfc3339()),
                ]);
            if let Some(ref token) = page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let page: EventListResponse = send_json(request).await?;
            for item in page.items {
                if let Some(event) = convert_event(item, calendar_id, business_offset) {
                    events.push(event);
                }
            }
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(
            calendar = %calendar_id,
            count = events.len(),
            "fetched REST events"
        );
        Ok(events)
    }
}

/// Sends a request and decodes a JSON body, mapping error statuses.
async fn send_json<T: serde::de::DeserializeOwned>(
    request: reqwest::RequestBuilder,
) -> ProviderResult<T> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            ProviderError::timeout("request timed out")
        } else if e.is_connect() {
            ProviderError::network(format!("connection failed: {e}"))
        } else {
            ProviderError::network(format!("request failed: {e}"))
        }
    })?;

    let status = response.status();
    match status {
        reqwest::StatusCode::OK => response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::invalid_response(format!("malformed JSON body: {e}"))),
        reqwest::StatusCode::UNAUTHORIZED => {
            Err(ProviderError::authentication("token rejected"))
        }
        reqwest::StatusCode::FORBIDDEN => Err(ProviderError::authorization("access denied")),
        reqwest::StatusCode::NOT_FOUND => Err(ProviderError::not_found("calendar not found")),
        reqwest::StatusCode::TOO_MANY_REQUESTS => {
            Err(ProviderError::rate_limited("rate limit exceeded"))
        }
        s if s.is_server_error() => Err(ProviderError::server(format!("server error ({s})"))),
        s => Err(ProviderError::invalid_response(format!(
            "unexpected status {s}"
        ))),
    }
}

/// Translates one API event into a [`RawEvent`].
///
/// Cancelled events and events without a usable start are dropped.
fn convert_event(
    item: ApiEvent,
    calendar_id: &str,
    business_offset: FixedOffset,
) -> Option<RawEvent> {
    if item
        .status
        .as_deref()
        .is_some_and(|s| s.eq_ignore_ascii_case("cancelled"))
    {
        return None;
    }

    let start = item.start.as_ref()?.to_utc(business_offset)?;

    let mut event = RawEvent::new(item.summary, start, calendar_id, ProviderKind::Rest);
    if let Some(id) = item.id {
        event = event.with_uid(id);
    }
    if let Some(end) = item.end.as_ref().and_then(|t| t.to_utc(business_offset)) {
        event = event.with_end(end);
    }

    for line in &item.recurrence {
        let line = line.trim();
        if let Some(rule_text) = strip_property(line, "RRULE") {
            match RecurrenceRule::parse(rule_text, business_offset) {
                Ok(rule) => event = event.with_rule(rule),
                Err(error) => {
                    warn!(
                        uid = ?event.uid,
                        rule = %rule_text,
                        error = %error,
                        "discarding malformed recurrence rule"
                    );
                }
            }
        } else if let Some(values) = strip_property(line, "EXDATE") {
            for value in values.split(',') {
                if let Some(exception) = parse_ical_datetime(value, business_offset) {
                    event = event.with_exception(exception);
                }
            }
        }
    }

    Some(event)
}

/// Strips `NAME[;PARAMS]:` from a recurrence-array line, if it matches.
fn strip_property<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let (head, value) = line.split_once(':')?;
    let head_name = head.split(';').next().unwrap_or(head);
    head_name.eq_ignore_ascii_case(name).then_some(value)
}
