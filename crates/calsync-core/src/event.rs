//! Event types for calendar mirroring.
//!
//! This module provides the core types for representing calendar events:
//! - [`Event`]: a provider-neutral calendar entry
//! - [`EventKind`]: single event, recurring series master, or expanded occurrence
//! - [`RecurrencePattern`]: the repetition rule carried by a series master
//! - [`ShowAs`]: free/busy status used to gate sync eligibility

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::time::EventTime;

/// The category label that marks an event as publishable.
pub const PUBLIC_CATEGORY: &str = "Public";

/// Category labels that must never appear on the public calendar.
pub const PRIVATE_CATEGORIES: &[&str] = &["Private", "Confidential", "Personal"];

/// Free/busy status of an event.
///
/// Only [`ShowAs::Busy`] events are eligible for mirroring; tentative
/// holds and free-time blocks stay private.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ShowAs {
    Free,
    Tentative,
    #[default]
    Busy,
    Oof,
    WorkingElsewhere,
}

/// The repetition rule of a recurring series.
///
/// Field names mirror what calendar services expose; only the fields
/// that participate in event identity are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrencePattern {
    /// Pattern type: "daily", "weekly", "absoluteMonthly", "relativeMonthly", ...
    pub pattern_type: String,
    /// Repeat every N units of the pattern type.
    pub interval: u32,
    /// Weekdays the pattern fires on (weekly and relative-monthly patterns).
    pub days_of_week: Vec<String>,
    /// Day of the month (absolute-monthly patterns).
    pub day_of_month: Option<u32>,
    /// Week index within the month: "first", "second", ... (relative patterns).
    pub index: Option<String>,
}

impl RecurrencePattern {
    /// Creates a weekly pattern on the given days.
    pub fn weekly(interval: u32, days: &[&str]) -> Self {
        Self {
            pattern_type: "weekly".to_string(),
            interval,
            days_of_week: days.iter().map(|d| d.to_string()).collect(),
            day_of_month: None,
            index: None,
        }
    }

    /// Creates a daily pattern.
    pub fn daily(interval: u32) -> Self {
        Self {
            pattern_type: "daily".to_string(),
            interval,
            ..Default::default()
        }
    }
}

/// What kind of calendar entry an [`Event`] is.
///
/// The variant carries the fields that only exist for that kind, so diff
/// and signature logic match exhaustively instead of probing optional
/// fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// A plain one-off event.
    Single,
    /// The template entry of a recurring series.
    SeriesMaster { recurrence: RecurrencePattern },
    /// One expanded instance of a recurring series.
    Occurrence {
        /// Id of the series master this instance belongs to, when known.
        series_id: Option<String>,
        /// The instance's original slot before any reschedule.
        original_start: Option<EventTime>,
        /// Whether this instance was cancelled on its calendar.
        is_cancelled: bool,
    },
}

/// A calendar event as observed from either the source or target calendar.
///
/// The `id` is assigned by the calendar service and is deliberately not
/// part of event identity; matching across calendars goes through
/// [`crate::signature::event_signature`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Opaque, service-assigned identifier.
    pub id: String,
    /// The event title.
    pub subject: String,
    /// Free-text body; may carry the sync marker on managed events.
    pub body: String,
    /// Display location, if any.
    pub location: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    pub is_all_day: bool,
    /// Labels attached to the event; `"Public"` gates visibility.
    pub categories: BTreeSet<String>,
    pub show_as: ShowAs,
    pub kind: EventKind,
    pub created_at: Option<DateTime<Utc>>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl Event {
    /// Creates a new single event with required fields.
    pub fn new(
        id: impl Into<String>,
        subject: impl Into<String>,
        start: EventTime,
        end: EventTime,
    ) -> Self {
        let is_all_day = start.is_all_day();
        Self {
            id: id.into(),
            subject: subject.into(),
            body: String::new(),
            location: None,
            start,
            end,
            is_all_day,
            categories: BTreeSet::new(),
            show_as: ShowAs::Busy,
            kind: EventKind::Single,
            created_at: None,
            last_modified: None,
        }
    }

    /// Builder method to set the body text.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Builder method to set the location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Builder method to add a category label.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.categories.insert(category.into());
        self
    }

    /// Builder method to set free/busy status.
    pub fn with_show_as(mut self, show_as: ShowAs) -> Self {
        self.show_as = show_as;
        self
    }

    /// Builder method to set the event kind.
    pub fn with_kind(mut self, kind: EventKind) -> Self {
        self.kind = kind;
        self
    }

    /// Builder method to mark this event as a series master.
    pub fn as_series_master(mut self, recurrence: RecurrencePattern) -> Self {
        self.kind = EventKind::SeriesMaster { recurrence };
        self
    }

    /// Builder method to mark this event as an occurrence of a series.
    pub fn as_occurrence(mut self, series_id: Option<String>, original_start: Option<EventTime>) -> Self {
        self.kind = EventKind::Occurrence {
            series_id,
            original_start,
            is_cancelled: false,
        };
        self
    }

    /// Builder method to set the creation timestamp.
    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Builder method to set the last-modified timestamp.
    pub fn with_last_modified(mut self, at: DateTime<Utc>) -> Self {
        self.last_modified = Some(at);
        self
    }

    /// Returns `true` if the event carries the public category label.
    pub fn is_public(&self) -> bool {
        self.categories.contains(PUBLIC_CATEGORY)
    }

    /// Returns `true` if the event should be mirrored to the public
    /// calendar: labeled public and shown as busy.
    pub fn is_sync_eligible(&self) -> bool {
        self.is_public() && self.show_as == ShowAs::Busy
    }

    /// Returns `true` if this is an expanded occurrence instance.
    pub fn is_occurrence(&self) -> bool {
        matches!(self.kind, EventKind::Occurrence { .. })
    }

    /// Returns `true` if this is a cancelled occurrence.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.kind,
            EventKind::Occurrence { is_cancelled: true, .. }
        )
    }

    /// Returns the recurrence pattern for series masters.
    pub fn recurrence(&self) -> Option<&RecurrencePattern> {
        match &self.kind {
            EventKind::SeriesMaster { recurrence } => Some(recurrence),
            _ => None,
        }
    }

    /// Returns the series id for occurrences.
    pub fn series_id(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Occurrence { series_id, .. } => series_id.as_deref(),
            _ => None,
        }
    }

    /// The instance slot used to address a specific occurrence: the
    /// original start when the instance was rescheduled, otherwise the
    /// actual start.
    pub fn occurrence_slot(&self) -> &EventTime {
        match &self.kind {
            EventKind::Occurrence {
                original_start: Some(original),
                ..
            } => original,
            _ => &self.start,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample() -> Event {
        let start = EventTime::from_utc("2025-03-01T14:00:00Z".parse().unwrap());
        let end = EventTime::from_utc("2025-03-01T15:00:00Z".parse().unwrap());
        Event::new("ev1", "Bake Sale", start, end)
    }

    #[test]
    fn sync_eligibility_requires_public_and_busy() {
        let event = sample();
        assert!(!event.is_sync_eligible());

        let event = sample().with_category(PUBLIC_CATEGORY);
        assert!(event.is_sync_eligible());

        let event = sample()
            .with_category(PUBLIC_CATEGORY)
            .with_show_as(ShowAs::Tentative);
        assert!(!event.is_sync_eligible());
    }

    #[test]
    fn all_day_flag_follows_start() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let event = Event::new(
            "ev2",
            "Parish Picnic",
            EventTime::from_date(date),
            EventTime::from_date(date.succ_opt().unwrap()),
        );
        assert!(event.is_all_day);
    }

    #[test]
    fn occurrence_slot_prefers_original_start() {
        let original = EventTime::from_utc("2025-03-01T14:00:00Z".parse().unwrap());
        let moved = EventTime::from_utc("2025-03-01T16:00:00Z".parse().unwrap());
        let end = EventTime::from_utc("2025-03-01T17:00:00Z".parse().unwrap());

        let instance = Event::new("ev3", "Choir", moved.clone(), end)
            .as_occurrence(Some("master1".into()), Some(original.clone()));
        assert_eq!(instance.occurrence_slot(), &original);

        let plain = sample();
        assert_eq!(plain.occurrence_slot(), &plain.start);
    }

    #[test]
    fn cached_document_shape_is_stable() {
        // The change cache persists events as JSON; the tagged layout is
        // part of the on-disk format.
        let event = sample().with_category(PUBLIC_CATEGORY);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"]["kind"], "single");
        assert_eq!(json["start"]["type"], "DateTime");
        assert_eq!(json["show_as"], "busy");

        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn cancelled_only_applies_to_occurrences() {
        let mut event = sample().as_occurrence(Some("m".into()), None);
        assert!(!event.is_cancelled());
        if let EventKind::Occurrence { is_cancelled, .. } = &mut event.kind {
            *is_cancelled = true;
        }
        assert!(event.is_cancelled());
        assert!(!sample().is_cancelled());
    }
}
