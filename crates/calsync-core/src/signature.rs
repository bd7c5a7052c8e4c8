//! Signature generation for event identity.
//!
//! A signature is the stable matching key that lets two independently
//! fetched copies of the same logical event be recognized as one, no
//! matter which calendar produced them or how the service formatted the
//! fields. The whole reconciliation scheme rests on every component
//! computing byte-identical signatures, so this is the only module that
//! may implement them: the engine, the change cache, and the validator
//! all call in here. A re-implementation that drifts by a single byte
//! silently duplicates every event on the next sync.
//!
//! Signatures are total: missing fields normalize to the empty string
//! instead of failing.

use crate::event::{Event, EventKind, RecurrencePattern};
use crate::marker;
use crate::time::EventTime;

/// Normalizes an event subject for matching.
///
/// Trims, lowercases, collapses internal whitespace, and strips the
/// punctuation calendar clients like to vary (`. , : ;`).
pub fn normalize_subject(subject: &str) -> String {
    let collapsed = subject
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    collapsed
        .chars()
        .filter(|c| !matches!(c, '.' | ',' | ':' | ';'))
        .collect()
}

/// Normalizes a location for matching: lowercase, strip spaces and `#`.
pub fn normalize_location(location: Option<&str>) -> String {
    location
        .unwrap_or_default()
        .to_lowercase()
        .chars()
        .filter(|c| *c != ' ' && *c != '#')
        .collect()
}

/// Formats an [`EventTime`] at the precision signatures use: minute
/// precision for timed events, bare date for all-day dates.
pub fn normalize_event_time(time: &EventTime) -> String {
    match time {
        EventTime::DateTime(dt) => dt.format("%Y-%m-%dT%H:%M").to_string(),
        EventTime::AllDay(date) => date.format("%Y-%m-%d").to_string(),
    }
}

/// Stable 8-hex-character digest of a recurrence pattern.
///
/// Days of week are sorted so the hash does not depend on the order the
/// service happened to return them in.
pub fn pattern_hash(pattern: &RecurrencePattern) -> String {
    let mut days = pattern.days_of_week.clone();
    days.sort();

    let canonical = format!(
        "type={};interval={};days={};day_of_month={};index={}",
        pattern.pattern_type,
        pattern.interval,
        days.join(","),
        pattern
            .day_of_month
            .map(|d| d.to_string())
            .unwrap_or_default(),
        pattern.index.as_deref().unwrap_or_default(),
    );

    let digest = md5::compute(canonical.as_bytes());
    format!("{digest:x}")[..8].to_string()
}

/// Computes the signature for an event.
///
/// The scheme branches on the event kind:
/// - series masters:  `recurring:{subject}:{pattern_hash}:{start}:{location}`
/// - occurrences:     `occurrence:{subject}[:{series_id}]:{start}:{location}`
/// - single events:   `single:{subject}:{date}:{time}:{location}`
///
/// Single-event signatures split the date and time so same-day events at
/// different times never collide; all-day events carry an `ALLDAY` time
/// part so a timed and an all-day event on the same date stay distinct.
///
/// Published mirrors have their location field cleared, with the text
/// moved into the body; when the field is empty the location is read
/// back from there so both copies of an event keep the same key.
pub fn event_signature(event: &Event) -> String {
    let subject = normalize_subject(&event.subject);
    let location = normalize_location(
        event
            .location
            .as_deref()
            .filter(|l| !l.is_empty())
            .or_else(|| marker::embedded_location(&event.body)),
    );

    let start = if event.is_all_day {
        event.start.date().format("%Y-%m-%d").to_string()
    } else {
        normalize_event_time(&event.start)
    };

    match &event.kind {
        EventKind::SeriesMaster { recurrence } => {
            let hash = pattern_hash(recurrence);
            format!("recurring:{subject}:{hash}:{start}:{location}")
        }
        EventKind::Occurrence { series_id, .. } => match series_id {
            Some(series) => format!("occurrence:{subject}:{series}:{start}:{location}"),
            None => format!("occurrence:{subject}:{start}:{location}"),
        },
        EventKind::Single => match start.split_once('T') {
            Some((date, time)) => format!("single:{subject}:{date}:{time}:{location}"),
            None => format!("single:{subject}:{start}:ALLDAY:{location}"),
        },
    }
}
