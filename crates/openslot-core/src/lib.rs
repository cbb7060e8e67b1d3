//! Core types: time windows, events, recurrence expansion, busy rules, slot math

pub mod busy;
pub mod dates;
pub mod event;
pub mod rrule;
pub mod slots;
pub mod time;
pub mod tracing;

pub use busy::BusyRules;
pub use dates::{format_utc, parse_ical_datetime, parse_request_date};
pub use event::{Occurrence, ProviderKind, RawEvent};
pub use rrule::{Frequency, RecurrenceRule, RuleError, expand};
pub use slots::{AvailabilitySlot, BusinessHours, DayHours, day_slots};
pub use time::{TimeWindow, local_midnight};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
