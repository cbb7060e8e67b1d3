//! Calendar-object date parsing.
//!
//! Providers hand us dates in three shapes:
//! - `YYYYMMDD`: date only, interpreted as midnight in the business timezone
//! - `YYYYMMDDTHHMMSS`: local time in the business timezone
//! - `YYYYMMDDTHHMMSSZ`: UTC
//!
//! Every call site parses through this module and every API response is
//! formatted through [`format_utc`], so the rest of the pipeline only ever
//! sees one canonical UTC representation.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Parses a calendar-object datetime string into a UTC instant.
///
/// `business_offset` is the fixed offset of the configured business
/// timezone; it anchors the date-only and local-time shapes.
///
/// Returns `None` for anything that doesn't match one of the three shapes.
pub fn parse_ical_datetime(s: &str, business_offset: FixedOffset) -> Option<DateTime<Utc>> {
    let s = s.trim();

    // Date only (YYYYMMDD): midnight in the business timezone
    if s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit()) {
        let date = NaiveDate::parse_from_str(s, "%Y%m%d").ok()?;
        return local_to_utc(date.and_hms_opt(0, 0, 0)?, business_offset);
    }

    // DateTime with Z suffix (UTC)
    if let Some(stripped) = s.strip_suffix('Z') {
        let dt = NaiveDateTime::parse_from_str(stripped, "%Y%m%dT%H%M%S").ok()?;
        return Some(Utc.from_utc_datetime(&dt));
    }

    // Local datetime in the business timezone
    let dt = NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S").ok()?;
    local_to_utc(dt, business_offset)
}

/// Converts a naive local datetime at the given fixed offset to UTC.
fn local_to_utc(naive: NaiveDateTime, offset: FixedOffset) -> Option<DateTime<Utc>> {
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Formats a UTC instant in the canonical representation used by every
/// API response and dedup key: `YYYY-MM-DDTHH:MM:SSZ`.
pub fn format_utc(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Parses a request-parameter date (`YYYY-MM-DD`), strictly.
pub fn parse_request_date(s: &str) -> Option<NaiveDate> {
    if s.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}
