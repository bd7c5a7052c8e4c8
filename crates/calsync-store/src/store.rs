//! The EventStore trait.
//!
//! This is the engine's only view of a calendar service. Implementations
//! own the HTTP transport, authentication, and wire format; the engine
//! sees typed events and a transient/permanent error split. The trait is
//! object safe so the engine can hold `Arc<dyn EventStore>`.

use std::future::Future;
use std::pin::Pin;

use calsync_core::{Event, EventTime, TimeWindow};

use crate::error::StoreResult;

/// A boxed future for async trait methods.
///
/// Boxing keeps the trait object safe for dynamic dispatch.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Read/write access to a calendar of events.
///
/// # Implementation notes
///
/// - `list_events` returns single events and series masters; expanded
///   occurrence instances come from `get_occurrences`.
/// - A 401 response should trigger one token refresh internally before
///   the call fails with an auth error.
/// - Occurrences are addressed by `(series_id, occurrence_slot)` rather
///   than an event id, matching how calendar services expose instance
///   exceptions.
pub trait EventStore: Send + Sync {
    /// Returns the name of this store (for logs and status).
    fn name(&self) -> &str;

    /// Resolves a calendar display name to its identifier.
    fn find_calendar<'a>(&'a self, name: &'a str) -> BoxFuture<'a, StoreResult<String>>;

    /// Lists events within the window (single events and series masters).
    fn list_events<'a>(
        &'a self,
        calendar_id: &'a str,
        window: TimeWindow,
    ) -> BoxFuture<'a, StoreResult<Vec<Event>>>;

    /// Creates an event; returns the service-assigned id.
    fn create_event<'a>(
        &'a self,
        calendar_id: &'a str,
        event: Event,
    ) -> BoxFuture<'a, StoreResult<String>>;

    /// Replaces an existing event's content.
    fn update_event<'a>(
        &'a self,
        calendar_id: &'a str,
        event_id: &'a str,
        event: Event,
    ) -> BoxFuture<'a, StoreResult<()>>;

    /// Deletes an event.
    fn delete_event<'a>(
        &'a self,
        calendar_id: &'a str,
        event_id: &'a str,
    ) -> BoxFuture<'a, StoreResult<()>>;

    /// Lists expanded occurrence instances within the window.
    fn get_occurrences<'a>(
        &'a self,
        calendar_id: &'a str,
        window: TimeWindow,
    ) -> BoxFuture<'a, StoreResult<Vec<Event>>>;

    /// Deletes one occurrence of a recurring series, leaving the rest of
    /// the series untouched.
    fn delete_occurrence<'a>(
        &'a self,
        calendar_id: &'a str,
        series_id: &'a str,
        occurrence_slot: &'a EventTime,
    ) -> BoxFuture<'a, StoreResult<()>>;

    /// Updates one occurrence of a recurring series.
    fn update_occurrence<'a>(
        &'a self,
        calendar_id: &'a str,
        series_id: &'a str,
        occurrence_slot: &'a EventTime,
        event: Event,
    ) -> BoxFuture<'a, StoreResult<()>>;
}
