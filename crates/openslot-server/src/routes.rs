//! HTTP surface.
//!
//! Request-path reads prefer the cache; a miss runs the merge pipeline
//! synchronously; an expired-but-graced entry is served stale while one
//! background refresh runs. Only request-shape validation (400) and total
//! provider failure (502) surface as errors; everything else degrades to
//! partial results.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use openslot_core::{Occurrence, TimeWindow, day_slots, format_utc, parse_request_date};

use crate::cache::{CacheKey, CacheLookup};
use crate::error::ApiError;
use crate::merge::{CalendarFetchStatus, merge_window};
use crate::state::AppState;

/// Builds the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/availability", get(availability))
        .route("/calendar/day", get(calendar_day))
        .route("/calendar/week", get(calendar_week))
        .route("/calendar/month", get(calendar_month))
        .route("/calendar/config", post(calendar_config))
        .route("/calendar/whitelist", post(calendar_whitelist))
        .route("/calendar/event-busy", post(calendar_event_busy))
        .route("/healthz", get(healthz))
        .route("/sync/refresh", post(sync_refresh))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Pipeline plumbing

struct PipelineResult {
    occurrences: Vec<Occurrence>,
    calendars: Vec<CalendarFetchStatus>,
    cached: bool,
}

/// Runs merge + classification for a window, bypassing the cache.
async fn run_pipeline(
    state: &AppState,
    window: TimeWindow,
) -> Result<(Vec<Occurrence>, Vec<CalendarFetchStatus>), ApiError> {
    let outcome = merge_window(&state.providers, window).await;
    if outcome.all_failed() {
        let detail = outcome
            .calendars
            .iter()
            .find_map(|c| c.error.clone())
            .unwrap_or_default();
        return Err(ApiError::UpstreamUnavailable(detail));
    }
    let rules = state.busy.get().await;
    let mut occurrences = outcome.occurrences;
    rules.classify_all(&mut occurrences);
    Ok((occurrences, outcome.calendars))
}

/// Cache-preferring read of the merged occurrences for a window.
async fn merged_occurrences(
    state: &AppState,
    scope: &str,
    window: TimeWindow,
) -> Result<PipelineResult, ApiError> {
    let key = CacheKey::new(scope, window);
    {
        let mut cache = state.cache.lock().await;
        match cache.lookup(&key) {
            CacheLookup::Fresh(occurrences) => {
                return Ok(PipelineResult {
                    occurrences,
                    calendars: Vec::new(),
                    cached: true,
                });
            }
            CacheLookup::Stale {
                occurrences,
                refresh_needed,
            } => {
                if refresh_needed {
                    spawn_refresh(state.clone(), key);
                }
                return Ok(PipelineResult {
                    occurrences,
                    calendars: Vec::new(),
                    cached: true,
                });
            }
            CacheLookup::Miss => {}
        }
    }

    let (occurrences, calendars) = run_pipeline(state, window).await?;
    state
        .cache
        .lock()
        .await
        .insert(key, occurrences.clone());
    Ok(PipelineResult {
        occurrences,
        calendars,
        cached: false,
    })
}

/// Refreshes one cache entry in the background after a stale serve.
fn spawn_refresh(state: AppState, key: CacheKey) {
    tokio::spawn(async move {
        match run_pipeline(&state, key.window).await {
            Ok((occurrences, _)) => {
                state.cache.lock().await.insert(key, occurrences);
            }
            Err(error) => {
                warn!(scope = %key.scope, error = %error, "background refresh failed");
                state.cache.lock().await.abort_refresh(&key);
            }
        }
    });
}

// ---------------------------------------------------------------------------
// Response shapes

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SlotDto {
    start: String,
    end: String,
    available: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AvailabilityResponse {
    date: String,
    slots: Vec<SlotDto>,
    open_minutes: Option<u16>,
    close_minutes: Option<u16>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventDto {
    uid: Option<String>,
    summary: String,
    start: String,
    end: String,
    calendar_url: String,
    blocking: bool,
    color: Option<String>,
}

impl EventDto {
    fn from_occurrence(occurrence: &Occurrence) -> Self {
        Self {
            uid: occurrence.series_id.clone(),
            summary: occurrence.summary.clone(),
            start: format_utc(occurrence.start),
            end: format_utc(occurrence.end),
            calendar_url: occurrence.calendar_id.clone(),
            blocking: occurrence.blocking,
            color: occurrence.color.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DayResponse {
    date: String,
    events: Vec<EventDto>,
    cached: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    start: String,
    end: String,
    events: Vec<EventDto>,
    cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    calendars: Option<Vec<CalendarFetchStatus>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CalendarEntry {
    id: String,
    busy: bool,
    color: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigResponse {
    calendars: Vec<CalendarEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IdSetResponse {
    uid: String,
    action: String,
    ids: Vec<String>,
}

/// `1` or `true` in a query flag.
fn flag(value: &Option<String>) -> bool {
    matches!(value.as_deref(), Some("1") | Some("true"))
}

// ---------------------------------------------------------------------------
// Availability

#[derive(Debug, Deserialize)]
struct AvailabilityQuery {
    date: String,
    duration: Option<i64>,
    buffer: Option<i64>,
}

async fn availability(
    State(state): State<AppState>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<AvailabilityResponse>, ApiError> {
    let date = parse_request_date(&query.date).ok_or_else(|| ApiError::invalid_date(&query.date))?;
    if state.business_hours.is_empty() {
        return Err(ApiError::missing_business_hours());
    }

    let window = TimeWindow::for_date(date, state.business_offset);
    let result = merged_occurrences(&state, "day", window).await?;

    let mut busy: Vec<(DateTime<Utc>, DateTime<Utc>)> = result
        .occurrences
        .iter()
        .filter(|occ| occ.blocking)
        .map(|occ| (occ.start, occ.end))
        .collect();
    for meeting in state.store.internal_meetings_in(window).await {
        busy.push((meeting.start, meeting.end));
    }

    let slots = day_slots(
        date,
        &state.business_hours,
        state.business_offset,
        query.duration.unwrap_or(30),
        query.buffer.unwrap_or(0),
        &busy,
    );

    let day_hours = state.business_hours.for_weekday(date.weekday());
    Ok(Json(AvailabilityResponse {
        date: query.date,
        slots: slots
            .iter()
            .map(|slot| SlotDto {
                start: format_utc(slot.start),
                end: format_utc(slot.end),
                available: slot.available,
            })
            .collect(),
        open_minutes: day_hours.map(|d| d.open_minutes),
        close_minutes: day_hours.map(|d| d.close_minutes),
    }))
}

// ---------------------------------------------------------------------------
// Calendar views

#[derive(Debug, Deserialize)]
struct DayQuery {
    date: String,
}

/// The single-day detail view shows everything, so the caller can
/// force-busy what it wants.
async fn calendar_day(
    State(state): State<AppState>,
    Query(query): Query<DayQuery>,
) -> Result<Json<DayResponse>, ApiError> {
    let date = parse_request_date(&query.date).ok_or_else(|| ApiError::invalid_date(&query.date))?;
    let window = TimeWindow::for_date(date, state.business_offset);
    let result = merged_occurrences(&state, "day", window).await?;

    Ok(Json(DayResponse {
        date: query.date,
        events: result
            .occurrences
            .iter()
            .map(EventDto::from_occurrence)
            .collect(),
        cached: result.cached,
    }))
}

#[derive(Debug, Deserialize)]
struct WeekQuery {
    start: String,
    end: String,
    #[serde(rename = "blockingOnly")]
    blocking_only: Option<String>,
    debug: Option<String>,
}

async fn calendar_week(
    State(state): State<AppState>,
    Query(query): Query<WeekQuery>,
) -> Result<Json<ListResponse>, ApiError> {
    let first =
        parse_request_date(&query.start).ok_or_else(|| ApiError::invalid_date(&query.start))?;
    let last = parse_request_date(&query.end).ok_or_else(|| ApiError::invalid_date(&query.end))?;
    if last < first {
        return Err(ApiError::invalid_range("end date precedes start date"));
    }
    if (last - first).num_days() > 62 {
        return Err(ApiError::invalid_range("window larger than 62 days"));
    }

    let window = TimeWindow::for_dates(first, last, state.business_offset);
    list_window(
        &state,
        "week",
        window,
        flag(&query.blocking_only),
        flag(&query.debug),
    )
    .await
}

#[derive(Debug, Deserialize)]
struct MonthQuery {
    year: i32,
    month: u32,
    #[serde(rename = "blockingOnly")]
    blocking_only: Option<String>,
    debug: Option<String>,
}

async fn calendar_month(
    State(state): State<AppState>,
    Query(query): Query<MonthQuery>,
) -> Result<Json<ListResponse>, ApiError> {
    if !(1970..=2100).contains(&query.year) {
        return Err(ApiError::invalid_range("year outside 1970-2100"));
    }
    let first = NaiveDate::from_ymd_opt(query.year, query.month, 1)
        .ok_or_else(|| ApiError::invalid_range("month outside 1-12"))?;
    let last = first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .ok_or_else(|| ApiError::invalid_range("month out of supported range"))?;

    let window = TimeWindow::for_dates(first, last, state.business_offset);
    list_window(
        &state,
        "month",
        window,
        flag(&query.blocking_only),
        flag(&query.debug),
    )
    .await
}

/// Shared list-view logic: visibility filtering, the blocking-only
/// filter, and optional per-calendar diagnostics (which bypass the cache
/// so they are always current).
async fn list_window(
    state: &AppState,
    scope: &str,
    window: TimeWindow,
    blocking_only: bool,
    debug: bool,
) -> Result<Json<ListResponse>, ApiError> {
    let result = if debug {
        let (occurrences, calendars) = run_pipeline(state, window).await?;
        PipelineResult {
            occurrences,
            calendars,
            cached: false,
        }
    } else {
        merged_occurrences(state, scope, window).await?
    };

    let rules = state.busy.get().await;
    let mut visible: Vec<&Occurrence> = result
        .occurrences
        .iter()
        .filter(|occ| rules.visible_in_lists(occ))
        .collect();
    if blocking_only {
        visible.retain(|occ| occ.blocking);
    }

    Ok(Json(ListResponse {
        start: format_utc(window.start),
        end: format_utc(window.end),
        events: visible
            .into_iter()
            .map(EventDto::from_occurrence)
            .collect(),
        cached: result.cached,
        calendars: debug.then_some(result.calendars),
    }))
}

// ---------------------------------------------------------------------------
// Busy configuration

static HEX_COLOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#[0-9a-fA-F]{6}$").expect("hex color regex is valid"));

#[derive(Debug, Deserialize)]
struct ConfigBody {
    busy: Option<Vec<String>>,
    colors: Option<BTreeMap<String, String>>,
}

async fn calendar_config(
    State(state): State<AppState>,
    Json(body): Json<ConfigBody>,
) -> Result<Json<ConfigResponse>, ApiError> {
    if let Some(ref colors) = body.colors {
        for color in colors.values() {
            if !HEX_COLOR.is_match(color) {
                return Err(ApiError::invalid_color(color));
            }
        }
    }

    let rules = state
        .busy
        .update(|rules| {
            if let Some(busy) = body.busy {
                rules.busy_calendar_ids = busy.into_iter().collect();
            }
            if let Some(colors) = body.colors {
                rules.calendar_colors.extend(colors);
            }
        })
        .await
        .map_err(|e| ApiError::Internal(format!("failed to persist busy config: {e}")))?;

    let mut ids: BTreeSet<String> = rules.busy_calendar_ids.iter().cloned().collect();
    ids.extend(rules.calendar_colors.keys().cloned());

    Ok(Json(ConfigResponse {
        calendars: ids
            .into_iter()
            .map(|id| CalendarEntry {
                busy: rules.calendar_is_busy(&id),
                color: rules.color_for(&id).map(str::to_owned),
                id,
            })
            .collect(),
    }))
}

#[derive(Debug, Deserialize)]
struct IdMutation {
    uid: String,
    action: String,
}

async fn calendar_whitelist(
    State(state): State<AppState>,
    Json(mutation): Json<IdMutation>,
) -> Result<Json<IdSetResponse>, ApiError> {
    mutate_id_set(&state, mutation, |rules| &mut rules.whitelist_ids).await
}

async fn calendar_event_busy(
    State(state): State<AppState>,
    Json(mutation): Json<IdMutation>,
) -> Result<Json<IdSetResponse>, ApiError> {
    mutate_id_set(&state, mutation, |rules| &mut rules.force_busy_ids).await
}

async fn mutate_id_set(
    state: &AppState,
    mutation: IdMutation,
    select: fn(&mut openslot_core::BusyRules) -> &mut BTreeSet<String>,
) -> Result<Json<IdSetResponse>, ApiError> {
    let add = match mutation.action.as_str() {
        "add" => true,
        "remove" => false,
        other => return Err(ApiError::invalid_action(other)),
    };

    let uid = mutation.uid.clone();
    let rules = state
        .busy
        .update(move |rules| {
            let set = select(rules);
            if add {
                set.insert(uid);
            } else {
                set.remove(&uid);
            }
        })
        .await
        .map_err(|e| ApiError::Internal(format!("failed to persist busy config: {e}")))?;

    let mut rules = rules;
    Ok(Json(IdSetResponse {
        ids: select(&mut rules).iter().cloned().collect(),
        uid: mutation.uid,
        action: mutation.action,
    }))
}

// ---------------------------------------------------------------------------
// Operations

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    last_sync: Option<String>,
    calendars: BTreeMap<String, crate::sync::SyncState>,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    let calendars = state.sync.states().await;
    let last_sync = calendars
        .values()
        .filter_map(|s| s.last_sync_at)
        .max()
        .map(format_utc);
    Json(HealthResponse {
        status: "ok",
        last_sync,
        calendars,
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RefreshBody {
    full: bool,
}

async fn sync_refresh(
    State(state): State<AppState>,
    body: Option<Json<RefreshBody>>,
) -> Json<serde_json::Value> {
    let full = body.map(|Json(b)| b.full).unwrap_or(false);
    let triggered = if full {
        state.sync.full_resync().await
    } else {
        state.sync.sync_now().await
    };
    Json(serde_json::json!({ "triggered": triggered, "full": full }))
}
