//! XML bodies and multistatus parsing for CalDAV.

use std::io::Cursor;

use chrono::{DateTime, Utc};
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, Event};

/// DAV namespace.
pub const DAV_NS: &str = "DAV:";
/// CalDAV namespace.
pub const CALDAV_NS: &str = "urn:ietf:params:xml:ns:caldav";

/// A calendar discovered via PROPFIND.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredCalendar {
    /// The calendar's href (path).
    pub href: String,
    /// The display name, if advertised.
    pub display_name: Option<String>,
}

/// One event entry in a REPORT multistatus response.
#[derive(Debug, Clone)]
pub struct ReportEntry {
    /// The event resource href.
    pub href: String,
    /// The raw calendar-object text.
    pub calendar_data: String,
}

fn write_start(writer: &mut Writer<Cursor<Vec<u8>>>, element: BytesStart<'_>) {
    writer
        .write_event(Event::Start(element))
        .expect("writing to an in-memory buffer cannot fail");
}

fn write_end(writer: &mut Writer<Cursor<Vec<u8>>>, name: &str) {
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .expect("writing to an in-memory buffer cannot fail");
}

fn write_empty(writer: &mut Writer<Cursor<Vec<u8>>>, name: &str) {
    writer
        .write_event(Event::Empty(BytesStart::new(name)))
        .expect("writing to an in-memory buffer cannot fail");
}

fn finish(writer: Writer<Cursor<Vec<u8>>>) -> String {
    String::from_utf8(writer.into_inner().into_inner())
        .expect("generated XML is valid UTF-8")
}

/// The PROPFIND body used for calendar discovery.
pub fn propfind_calendars_body() -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    let mut propfind = BytesStart::new("d:propfind");
    propfind.push_attribute(("xmlns:d", DAV_NS));
    propfind.push_attribute(("xmlns:c", CALDAV_NS));
    write_start(&mut writer, propfind);

    write_start(&mut writer, BytesStart::new("d:prop"));
    write_empty(&mut writer, "d:displayname");
    write_empty(&mut writer, "d:resourcetype");
    write_end(&mut writer, "d:prop");

    write_end(&mut writer, "d:propfind");
    finish(writer)
}

/// The REPORT calendar-query body for a time-ranged event fetch.
pub fn calendar_query_body(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    let mut query = BytesStart::new("c:calendar-query");
    query.push_attribute(("xmlns:d", DAV_NS));
    query.push_attribute(("xmlns:c", CALDAV_NS));
    write_start(&mut writer, query);

    write_start(&mut writer, BytesStart::new("d:prop"));
    write_empty(&mut writer, "d:getetag");
    write_empty(&mut writer, "c:calendar-data");
    write_end(&mut writer, "d:prop");

    write_start(&mut writer, BytesStart::new("c:filter"));

    let mut vcal = BytesStart::new("c:comp-filter");
    vcal.push_attribute(("name", "VCALENDAR"));
    write_start(&mut writer, vcal);

    let mut vevent = BytesStart::new("c:comp-filter");
    vevent.push_attribute(("name", "VEVENT"));
    write_start(&mut writer, vevent);

    let mut time_range = BytesStart::new("c:time-range");
    time_range.push_attribute(("start", format_caldav_datetime(start).as_str()));
    time_range.push_attribute(("end", format_caldav_datetime(end).as_str()));
    writer
        .write_event(Event::Empty(time_range))
        .expect("writing to an in-memory buffer cannot fail");

    write_end(&mut writer, "c:comp-filter");
    write_end(&mut writer, "c:comp-filter");
    write_end(&mut writer, "c:filter");
    write_end(&mut writer, "c:calendar-query");
    finish(writer)
}

/// Formats an instant the way CalDAV time-range attributes expect.
fn format_caldav_datetime(dt: DateTime<Utc>) -> String {
    dt.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Strips a namespace prefix from an element name.
fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

/// Parses a PROPFIND multistatus response into discovered calendars.
///
/// Only responses whose resourcetype contains a `calendar` element are
/// kept.
pub fn parse_propfind_response(xml: &str) -> Vec<DiscoveredCalendar> {
    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut calendars = Vec::new();
    let mut href: Option<String> = None;
    let mut display_name: Option<String> = None;
    let mut is_calendar = false;
    let mut current_element: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match local_name(&name) {
                    "response" => {
                        href = None;
                        display_name = None;
                        is_calendar = false;
                    }
                    "href" | "displayname" => {
                        current_element = Some(local_name(&name).to_string());
                    }
                    "calendar" => is_calendar = true,
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if local_name(&name) == "response" {
                    if is_calendar
                        && let Some(href) = href.take()
                    {
                        calendars.push(DiscoveredCalendar {
                            href,
                            display_name: display_name.take(),
                        });
                    }
                    href = None;
                    display_name = None;
                    is_calendar = false;
                }
                current_element = None;
            }
            Ok(Event::Text(e)) => {
                if let Some(ref element) = current_element {
                    let text = e.unescape().unwrap_or_default().to_string();
                    match element.as_str() {
                        "href" => href = Some(text),
                        "displayname" => display_name = Some(text),
                        _ => {}
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    calendars
}

/// Parses a REPORT multistatus response into per-event entries.
pub fn parse_report_response(xml: &str) -> Vec<ReportEntry> {
    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut href: Option<String> = None;
    let mut calendar_data: Option<String> = None;
    let mut current_element: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match local_name(&name) {
                    "response" => {
                        href = None;
                        calendar_data = None;
                    }
                    "href" | "calendar-data" => {
                        current_element = Some(local_name(&name).to_string());
                    }
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if local_name(&name) == "response" {
                    if let (Some(href), Some(data)) = (href.take(), calendar_data.take()) {
                        entries.push(ReportEntry {
                            href,
                            calendar_data: data,
                        });
                    }
                    href = None;
                    calendar_data = None;
                }
                current_element = None;
            }
            Ok(Event::Text(e)) => {
                if let Some(ref element) = current_element {
                    let text = e.unescape().unwrap_or_default().to_string();
                    match element.as_str() {
                        "href" => href = Some(text),
                        "calendar-data" => calendar_data = Some(text),
                        _ => {}
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    entries
}
