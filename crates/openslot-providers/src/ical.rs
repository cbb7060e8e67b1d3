//! Calendar-object text parsing.
//!
//! Turns the raw line-oriented text a CalDAV server returns into
//! [`RawEvent`]s. Folded continuation lines (leading space or tab) are
//! joined before field parsing; each `BEGIN:VEVENT`/`END:VEVENT` block
//! becomes at most one event. A block without a start is dropped, as is
//! anything cancelled; a malformed recurrence rule is logged and discarded
//! so the event survives as a single occurrence.

use chrono::FixedOffset;
use tracing::{debug, warn};

use openslot_core::{ProviderKind, RawEvent, RecurrenceRule, parse_ical_datetime};

/// Parses calendar-object text into raw events.
pub fn parse_calendar_text(
    text: &str,
    calendar_id: &str,
    provider: ProviderKind,
    business_offset: FixedOffset,
) -> Vec<RawEvent> {
    let mut events = Vec::new();
    let mut block: Option<EventBlock> = None;

    for line in unfold_lines(text) {
        if line.eq_ignore_ascii_case("BEGIN:VEVENT") {
            block = Some(EventBlock::default());
            continue;
        }
        if line.eq_ignore_ascii_case("END:VEVENT") {
            if let Some(finished) = block.take()
                && let Some(event) = finished.build(calendar_id, provider, business_offset)
            {
                events.push(event);
            }
            continue;
        }
        if let Some(ref mut current) = block {
            current.apply_line(&line, business_offset);
        }
    }

    debug!(
        calendar = %calendar_id,
        count = events.len(),
        "parsed calendar object text"
    );
    events
}

/// Joins folded continuation lines into logical lines.
///
/// A continuation line is any line beginning with a space or tab; it is
/// concatenated to the previous logical line with that one leading
/// whitespace character stripped.
fn unfold_lines(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in text.lines() {
        if let Some(rest) = raw.strip_prefix(' ').or_else(|| raw.strip_prefix('\t'))
            && let Some(previous) = lines.last_mut()
        {
            previous.push_str(rest);
            continue;
        }
        lines.push(raw.to_string());
    }
    lines
}

/// Minimal text unescaping for property values.
fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(escaped) => out.push(escaped),
            None => out.push('\\'),
        }
    }
    out
}

/// Accumulates the fields of one VEVENT block.
#[derive(Default)]
struct EventBlock {
    uid: Option<String>,
    summary: Option<String>,
    start: Option<chrono::DateTime<chrono::Utc>>,
    end: Option<chrono::DateTime<chrono::Utc>>,
    rule_text: Option<String>,
    exceptions: Vec<chrono::DateTime<chrono::Utc>>,
    cancelled: bool,
}

impl EventBlock {
    /// Applies one `NAME[;PARAMS]:VALUE` content line.
    fn apply_line(&mut self, line: &str, business_offset: FixedOffset) {
        let Some((name_params, value)) = line.split_once(':') else {
            return;
        };
        let name = name_params
            .split(';')
            .next()
            .unwrap_or(name_params)
            .trim()
            .to_ascii_uppercase();

        match name.as_str() {
            "UID" => self.uid = Some(value.trim().to_string()),
            "SUMMARY" => self.summary = Some(unescape_text(value.trim())),
            "DTSTART" => self.start = parse_ical_datetime(value, business_offset),
            "DTEND" => self.end = parse_ical_datetime(value, business_offset),
            "RRULE" => self.rule_text = Some(value.trim().to_string()),
            "EXDATE" => {
                // Comma-separated, repeatable; unparseable entries are skipped.
                self.exceptions.extend(
                    value
                        .split(',')
                        .filter_map(|part| parse_ical_datetime(part, business_offset)),
                );
            }
            "STATUS" => self.cancelled = value.trim().eq_ignore_ascii_case("CANCELLED"),
            _ => {}
        }
    }

    /// Finishes the block. Returns `None` when the block has no start or
    /// is cancelled.
    fn build(
        self,
        calendar_id: &str,
        provider: ProviderKind,
        business_offset: FixedOffset,
    ) -> Option<RawEvent> {
        let start = self.start?;
        if self.cancelled {
            return None;
        }

        let mut event = RawEvent::new(
            self.summary.unwrap_or_default(),
            start,
            calendar_id,
            provider,
        );
        if let Some(uid) = self.uid {
            event = event.with_uid(uid);
        }
        if let Some(end) = self.end {
            event = event.with_end(end);
        }
        for exception in self.exceptions {
            event = event.with_exception(exception);
        }
        if let Some(rule_text) = self.rule_text {
            match RecurrenceRule::parse(&rule_text, business_offset) {
                Ok(rule) => event = event.with_rule(rule),
                Err(error) => {
                    // Rule errors fall back to a single occurrence.
                    warn!(
                        uid = ?event.uid,
                        rule = %rule_text,
                        error = %error,
                        "discarding malformed recurrence rule"
                    );
                }
            }
        }
        Some(event)
    }
}
