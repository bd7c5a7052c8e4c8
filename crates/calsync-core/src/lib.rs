//! Core types for calsync: events, time windows, signatures, sync marker.

pub mod event;
pub mod marker;
pub mod signature;
pub mod time;
pub mod tracing;

pub use event::{
    Event, EventKind, RecurrencePattern, ShowAs, PRIVATE_CATEGORIES, PUBLIC_CATEGORY,
};
pub use signature::{
    event_signature, normalize_event_time, normalize_location, normalize_subject, pattern_hash,
};
pub use time::{EventTime, TimeWindow};
pub use tracing::{init_tracing, TracingConfig, TracingError, TracingOutputFormat};
