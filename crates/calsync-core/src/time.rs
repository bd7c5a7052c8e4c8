//! Time types for calendar events.
//!
//! This module provides [`EventTime`] for representing event start/end times
//! (a specific datetime or a bare date for all-day events), and
//! [`TimeWindow`] for bounding fetches and occurrence scans.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Represents the time of a calendar event.
///
/// Calendar events can have two types of times:
/// - **DateTime**: A specific point in time (with timezone, stored as UTC)
/// - **AllDay**: A date without a specific time (all-day events)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum EventTime {
    /// A specific datetime, stored in UTC.
    DateTime(DateTime<Utc>),
    /// An all-day event date (no specific time).
    AllDay(NaiveDate),
}

impl EventTime {
    /// Creates a new `EventTime::DateTime` from a UTC datetime.
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self::DateTime(dt)
    }

    /// Creates a new `EventTime::DateTime` from a datetime in any timezone.
    pub fn from_local<Tz: TimeZone>(dt: DateTime<Tz>) -> Self {
        Self::DateTime(dt.with_timezone(&Utc))
    }

    /// Creates a new `EventTime::AllDay` from a date.
    pub fn from_date(date: NaiveDate) -> Self {
        Self::AllDay(date)
    }

    /// Returns `true` if this is an all-day event time.
    pub fn is_all_day(&self) -> bool {
        matches!(self, Self::AllDay(_))
    }

    /// Returns the datetime if this is a `DateTime` variant.
    pub fn as_datetime(&self) -> Option<&DateTime<Utc>> {
        match self {
            Self::DateTime(dt) => Some(dt),
            Self::AllDay(_) => None,
        }
    }

    /// Converts to a UTC datetime for comparison purposes.
    ///
    /// For all-day events, returns midnight UTC on that date.
    pub fn to_utc_datetime(&self) -> DateTime<Utc> {
        match self {
            Self::DateTime(dt) => *dt,
            Self::AllDay(date) => date.and_time(chrono::NaiveTime::MIN).and_utc(),
        }
    }

    /// Returns the date portion of this event time.
    pub fn date(&self) -> NaiveDate {
        match self {
            Self::DateTime(dt) => dt.date_naive(),
            Self::AllDay(date) => *date,
        }
    }
}

impl PartialOrd for EventTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_utc_datetime().cmp(&other.to_utc_datetime())
    }
}

/// A half-open time range `[start, end)` used to bound calendar queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a window from explicit bounds.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The overall sync range: `cutoff_days` back to `lookahead_days` ahead.
    pub fn around_now(cutoff_days: i64, lookahead_days: i64) -> Self {
        let now = Utc::now();
        Self {
            start: now - Duration::days(cutoff_days),
            end: now + Duration::days(lookahead_days),
        }
    }

    /// The rolling window used by the occurrence exception passes:
    /// yesterday through `lookahead_days` ahead.
    pub fn occurrence_window(lookahead_days: i64) -> Self {
        let now = Utc::now();
        Self {
            start: now - Duration::days(1),
            end: now + Duration::days(lookahead_days),
        }
    }

    /// Returns `true` if the given instant falls inside the window.
    pub fn contains(&self, dt: DateTime<Utc>) -> bool {
        self.start <= dt && dt < self.end
    }

    /// Returns `true` if the given event time falls inside the window.
    pub fn contains_time(&self, time: &EventTime) -> bool {
        self.contains(time.to_utc_datetime())
    }

    /// Splits the window into week-sized chunks.
    ///
    /// Upstream calendar APIs cap the range of a single listing call, so
    /// fetches walk the overall range one week at a time. The final chunk
    /// is clamped to the window end.
    pub fn weekly_chunks(&self) -> Vec<TimeWindow> {
        let mut chunks = Vec::new();
        let mut cursor = self.start;
        while cursor < self.end {
            let chunk_end = (cursor + Duration::days(7)).min(self.end);
            chunks.push(TimeWindow::new(cursor, chunk_end));
            cursor = chunk_end;
        }
        chunks
    }
}
