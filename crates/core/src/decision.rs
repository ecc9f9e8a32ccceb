//! Attendance decision logic: next event type, duplicate suppression, and
//! the minimum-gap rule for exits.
//!
//! The decision functions never fail. Any lookup error or unparsable
//! timestamp falls open to [`EventType::Entry`], logged at warn level so
//! corrupted history stays visible.

use chrono::{Local, NaiveDateTime};
use log::warn;

use crate::error::Result;
use crate::models::{AttendanceEvent, EventType, LOCAL_TIMESTAMP_FORMAT};

/// Seconds under which a second event for the same person is treated as an
/// accidental double tap.
pub const DUPLICATE_WINDOW_SECS: i64 = 30;

/// An exit is refused while the last entry is strictly younger than this.
pub const MIN_EXIT_GAP_MINUTES: f64 = 60.0;

/// Elapsed-hours thresholds governing whether an open entry is still active.
#[derive(Debug, Clone, Copy)]
pub struct ToleranceWindow {
    pub min_hours: f64,
    pub max_hours: f64,
}

impl Default for ToleranceWindow {
    fn default() -> Self {
        ToleranceWindow {
            min_hours: 14.0,
            max_hours: 16.0,
        }
    }
}

/// Read-only history lookups the decision logic needs from the local store.
pub trait EventHistory {
    /// Most recent event for a person, ordered by timestamp descending.
    fn last_event(&self, person_id: &str) -> Result<Option<AttendanceEvent>>;

    /// Timestamp of the most recent ENTRY event for a person.
    fn last_entry_timestamp(&self, person_id: &str) -> Result<Option<String>>;
}

/// Parses a stored timestamp, tolerating the formats seen across remote
/// deployments (store format, ISO 8601 with or without offset, day-first).
pub fn parse_event_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, LOCAL_TIMESTAMP_FORMAT) {
        return Some(ts);
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(ts);
    }
    if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(ts.naive_local());
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%d/%m/%Y %H:%M:%S") {
        return Some(ts);
    }
    None
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Decides whether the next event for a person is an entry or an exit.
///
/// No history or a trailing exit produces an entry. A trailing entry older
/// than the tolerance minimum is treated as an abandoned shift and also
/// produces a fresh entry; otherwise the normal alternation yields an exit.
pub fn decide_next_type(
    history: &impl EventHistory,
    person_id: &str,
    window: ToleranceWindow,
) -> EventType {
    let last = match history.last_event(person_id) {
        Ok(last) => last,
        Err(err) => {
            warn!(
                "[Decision] History lookup failed for {}: {}. Defaulting to ENTRY",
                person_id, err
            );
            return EventType::Entry;
        }
    };
    let Some(last) = last else {
        return EventType::Entry;
    };
    if last.event_type == EventType::Exit {
        return EventType::Entry;
    }
    let Some(ts) = parse_event_timestamp(&last.timestamp) else {
        warn!(
            "[Decision] Unparsable timestamp '{}' for {}. Defaulting to ENTRY",
            last.timestamp, person_id
        );
        return EventType::Entry;
    };
    let elapsed_hours = (now() - ts).num_seconds() as f64 / 3600.0;
    if elapsed_hours >= window.min_hours {
        EventType::Entry
    } else {
        EventType::Exit
    }
}

/// True when the most recent event for the person is younger than
/// `min_seconds`. Callers check this before persisting a new event.
pub fn has_recent_duplicate(
    history: &impl EventHistory,
    person_id: &str,
    min_seconds: i64,
) -> bool {
    let last = match history.last_event(person_id) {
        Ok(Some(last)) => last,
        Ok(None) => return false,
        Err(_) => return false,
    };
    match parse_event_timestamp(&last.timestamp) {
        Some(ts) => (now() - ts).num_seconds() < min_seconds,
        None => false,
    }
}

/// Minutes elapsed since the person's most recent entry, if any.
pub fn minutes_since_last_entry(history: &impl EventHistory, person_id: &str) -> Option<f64> {
    let raw = history.last_entry_timestamp(person_id).ok().flatten()?;
    let ts = parse_event_timestamp(&raw)?;
    Some((now() - ts).num_seconds() as f64 / 60.0)
}

/// Checks the minimum-gap rule for a decided exit. Returns the offending gap
/// in minutes when the exit must be refused; `None` means the exit may
/// proceed. Exactly 60 minutes is allowed, only a strictly smaller gap
/// blocks.
pub fn minimum_gap_violation(history: &impl EventHistory, person_id: &str) -> Option<f64> {
    let minutes = minutes_since_last_entry(history, person_id)?;
    if minutes < MIN_EXIT_GAP_MINUTES {
        Some(minutes)
    } else {
        None
    }
}
