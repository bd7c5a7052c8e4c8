//! The reconciliation pass: diff source against target into operations.
//!
//! Given the public events fetched from the source calendar and the full
//! event list fetched from the target, [`plan`] computes the minimal set
//! of creates, updates, and deletes that converges the target. Matching
//! is entirely signature-based; service-assigned ids never cross
//! calendars.
//!
//! Two invariants shape everything here:
//! - only events carrying the sync marker are ever updated or deleted;
//! - when managed target events collide on a signature, the oldest
//!   created event keeps the identity and the rest are deleted, so
//!   subscribers keep seeing the same event instance.

use std::collections::{HashMap, HashSet};

use calsync_core::{
    event_signature, marker, normalize_location, normalize_subject, Event, EventKind, ShowAs,
};
use chrono::{DateTime, Utc};
use tracing::debug;

/// The output of one reconciliation pass. Created per sync run, consumed
/// immediately, never persisted.
#[derive(Debug, Default)]
pub struct OperationSet {
    /// Source events with no counterpart on the target.
    pub to_add: Vec<Event>,
    /// `(source, target)` pairs whose content diverged.
    pub to_update: Vec<(Event, Event)>,
    /// Managed target events no longer present on the source, plus
    /// duplicate cleanup.
    pub to_delete: Vec<Event>,
}

impl OperationSet {
    /// Total number of planned operations.
    pub fn total(&self) -> usize {
        self.to_add.len() + self.to_update.len() + self.to_delete.len()
    }

    /// Returns `true` if the target already matches the source.
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Builds the published form of a source event.
///
/// Privacy stripping happens here: the location moves into the body as
/// display text and the location field itself is cleared, the event is
/// forced to show as busy, and the sync marker is embedded so the next
/// reconciliation recognizes the event as managed.
pub fn prepare_public_event(source: &Event) -> Event {
    let location_line = match source.location.as_deref() {
        Some(loc) if !loc.is_empty() => {
            format!("<p><strong>Location:</strong> {loc}</p>")
        }
        _ => String::new(),
    };

    let mut prepared = source.clone();
    prepared.id = String::new();
    prepared.body = marker::embed(&location_line, &source.id);
    prepared.location = None;
    prepared.show_as = ShowAs::Busy;
    prepared.created_at = None;
    prepared
}

fn created_order(event: &Event) -> DateTime<Utc> {
    event.created_at.unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Indexes managed target events by signature.
///
/// Returns the canonical event per signature plus the colliding extras
/// slated for duplicate cleanup. The event with the earliest
/// `created_at` wins; a missing timestamp sorts first.
pub fn build_target_map(managed: Vec<Event>) -> (HashMap<String, Event>, Vec<Event>) {
    let mut by_signature: HashMap<String, Event> = HashMap::new();
    let mut duplicates = Vec::new();

    for event in managed {
        let signature = event_signature(&event);
        match by_signature.get_mut(&signature) {
            Some(existing) => {
                if created_order(&event) < created_order(existing) {
                    debug!(signature = %signature, "duplicate target event; keeping older newcomer");
                    duplicates.push(std::mem::replace(existing, event));
                } else {
                    debug!(signature = %signature, "duplicate target event; keeping older incumbent");
                    duplicates.push(event);
                }
            }
            None => {
                by_signature.insert(signature, event);
            }
        }
    }

    (by_signature, duplicates)
}

/// Decides whether a matched source/target pair diverged.
///
/// Fast path: equal `last_modified` timestamps mean nothing changed.
/// Otherwise the published form of the source is compared field by
/// field against the target, short-circuiting on the first difference.
/// A metadata-only touch upstream (timestamps differ, content does not)
/// deliberately reports `false` to avoid needless write traffic.
pub fn needs_update(source: &Event, target: &Event) -> bool {
    if source.last_modified.is_some() && source.last_modified == target.last_modified {
        return false;
    }

    let prepared = prepare_public_event(source);

    if normalize_subject(&prepared.subject) != normalize_subject(&target.subject) {
        return true;
    }
    if prepared.start != target.start || prepared.end != target.end {
        return true;
    }
    if prepared.is_all_day != target.is_all_day {
        return true;
    }
    if prepared.categories != target.categories {
        return true;
    }
    if normalize_location(prepared.location.as_deref())
        != normalize_location(target.location.as_deref())
    {
        return true;
    }

    // The marker itself must never register as a change.
    let prepared_body = marker::strip(&prepared.body).trim().to_lowercase();
    let target_body = marker::strip(&target.body).trim().to_lowercase();
    if prepared_body != target_body {
        return true;
    }

    if let EventKind::SeriesMaster { recurrence } = &prepared.kind
        && Some(recurrence) != target.recurrence()
    {
        return true;
    }

    false
}

/// Computes the operation set that converges the target to the source.
///
/// Source occurrences are skipped entirely; they are handled by the
/// occurrence exception pass so they are never double-counted against
/// their series master. Target events without the sync marker are
/// excluded from updates and deletes, but their signatures still
/// suppress adds so the engine never creates a duplicate of an event a
/// human already put on the public calendar.
pub fn plan(source_events: &[Event], target_events: &[Event]) -> OperationSet {
    let managed: Vec<Event> = target_events
        .iter()
        .filter(|e| marker::is_managed(&e.body))
        .cloned()
        .collect();

    let (target_by_signature, duplicates) = build_target_map(managed);
    let mut remaining = target_by_signature;

    let existing_signatures: HashSet<String> =
        target_events.iter().map(event_signature).collect();

    let mut ops = OperationSet::default();

    for source in source_events {
        if source.is_occurrence() {
            continue;
        }
        let signature = event_signature(source);

        if existing_signatures.contains(&signature) {
            match remaining.remove(&signature) {
                Some(target) => {
                    if needs_update(source, &target) {
                        ops.to_update.push((source.clone(), target));
                    }
                }
                None => {
                    // Either an unmanaged event already represents this
                    // one, or a second source event collided on the
                    // signature this run. Leave it alone.
                    debug!(signature = %signature, "signature exists but is not ours to touch");
                }
            }
        } else {
            ops.to_add.push(source.clone());
        }
    }

    ops.to_delete.extend(remaining.into_values());
    ops.to_delete.extend(duplicates);

    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use calsync_core::{EventTime, PUBLIC_CATEGORY};
    use chrono::Duration;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn source_event(subject: &str, start: &str, location: Option<&str>) -> Event {
        let start = utc(start);
        let mut event = Event::new(
            format!("src-{subject}"),
            subject,
            EventTime::from_utc(start),
            EventTime::from_utc(start + Duration::hours(1)),
        )
        .with_category(PUBLIC_CATEGORY)
        .with_show_as(ShowAs::Busy);
        if let Some(loc) = location {
            event = event.with_location(loc);
        }
        event
    }

    /// The target-side copy the engine would have created for a source
    /// event: published form, with a service id and creation time.
    fn synced_copy(source: &Event, id: &str, created: &str) -> Event {
        let mut copy = prepare_public_event(source);
        copy.id = id.to_string();
        copy.created_at = Some(utc(created));
        copy
    }

    #[test]
    fn empty_target_adds_everything() {
        let bake_sale = source_event("Bake Sale", "2025-03-01T14:00:00Z", None);
        let ops = plan(&[bake_sale.clone()], &[]);

        assert_eq!(ops.to_add.len(), 1);
        assert_eq!(ops.to_add[0].subject, "Bake Sale");
        assert!(ops.to_update.is_empty());
        assert!(ops.to_delete.is_empty());
    }

    #[test]
    fn reconcile_is_idempotent() {
        let source = vec![
            source_event("Bake Sale", "2025-03-01T14:00:00Z", Some("Hall A")),
            source_event("Mass", "2025-03-02T09:30:00Z", None),
        ];
        let target: Vec<Event> = source
            .iter()
            .enumerate()
            .map(|(i, e)| synced_copy(e, &format!("tgt-{i}"), "2025-01-01T00:00:00Z"))
            .collect();

        let ops = plan(&source, &target);
        assert!(ops.is_empty(), "second pass must be a no-op: {ops:?}");
    }

    #[test]
    fn dropped_source_event_is_deleted() {
        let kept = source_event("Mass", "2025-03-02T09:30:00Z", None);
        let dropped = source_event("Bake Sale", "2025-03-01T14:00:00Z", None);

        let target = vec![
            synced_copy(&kept, "tgt-1", "2025-01-01T00:00:00Z"),
            synced_copy(&dropped, "tgt-2", "2025-01-01T00:00:00Z"),
        ];

        let ops = plan(&[kept], &target);
        assert!(ops.to_add.is_empty());
        assert_eq!(ops.to_delete.len(), 1);
        assert_eq!(ops.to_delete[0].id, "tgt-2");
    }

    #[test]
    fn unmanaged_target_events_are_never_touched() {
        let source = source_event("Bake Sale", "2025-03-01T14:00:00Z", None);

        // Same logical event, created by hand on the public calendar:
        // no marker in the body.
        let mut foreign = source.clone();
        foreign.id = "foreign-1".to_string();
        foreign.body = "<p>Hand-entered event</p>".to_string();

        let ops = plan(&[source], &[foreign]);
        assert!(ops.to_add.is_empty(), "must not duplicate the foreign event");
        assert!(ops.to_update.is_empty());
        assert!(ops.to_delete.is_empty());
    }

    #[test]
    fn unmanaged_events_do_not_block_deletes_of_managed_ones() {
        let stale = source_event("Old Fair", "2025-02-01T10:00:00Z", None);
        let foreign = Event::new(
            "foreign-1",
            "Village Market",
            EventTime::from_utc(utc("2025-02-02T10:00:00Z")),
            EventTime::from_utc(utc("2025-02-02T12:00:00Z")),
        );

        let target = vec![synced_copy(&stale, "tgt-1", "2025-01-01T00:00:00Z"), foreign];
        let ops = plan(&[], &target);

        assert_eq!(ops.to_delete.len(), 1);
        assert_eq!(ops.to_delete[0].id, "tgt-1");
    }

    #[test]
    fn oldest_created_duplicate_wins() {
        let source = source_event("Bake Sale", "2025-03-01T14:00:00Z", None);
        let older = synced_copy(&source, "tgt-old", "2025-01-01T00:00:00Z");
        let newer = synced_copy(&source, "tgt-new", "2025-02-01T00:00:00Z");

        let ops = plan(&[source], &[newer, older]);

        assert_eq!(ops.to_delete.len(), 1);
        assert_eq!(ops.to_delete[0].id, "tgt-new");
        assert!(ops.to_add.is_empty());
    }

    #[test]
    fn source_occurrences_are_skipped() {
        let instance = source_event("Choir", "2025-03-10T18:00:00Z", None)
            .as_occurrence(Some("master1".into()), None);
        let ops = plan(&[instance], &[]);
        assert!(ops.is_empty());
    }

    #[test]
    fn needs_update_fast_path_on_equal_timestamps() {
        let modified = utc("2025-03-01T08:00:00Z");
        let mut source = source_event("Bake Sale", "2025-03-01T14:00:00Z", Some("Hall A"));
        source.last_modified = Some(modified);

        // Target content is stale, but the timestamps match: trusted as
        // unchanged without comparing.
        let mut target = synced_copy(&source, "tgt-1", "2025-01-01T00:00:00Z");
        target.subject = "Something Else".to_string();
        target.last_modified = Some(modified);

        assert!(!needs_update(&source, &target));
    }

    #[test]
    fn needs_update_detects_location_change_via_body() {
        let mut source = source_event("Bake Sale", "2025-03-01T14:00:00Z", Some("Hall A"));
        source.last_modified = Some(utc("2025-03-01T08:00:00Z"));
        let mut target = synced_copy(&source, "tgt-1", "2025-01-01T00:00:00Z");
        target.last_modified = Some(utc("2025-03-01T08:00:00Z"));

        // Location edited upstream, lastModified bumped.
        source.location = Some("Hall B".to_string());
        source.last_modified = Some(utc("2025-03-02T08:00:00Z"));

        assert!(needs_update(&source, &target));
    }

    #[test]
    fn metadata_only_touch_is_not_an_update() {
        let mut source = source_event("Bake Sale", "2025-03-01T14:00:00Z", Some("Hall A"));
        source.last_modified = Some(utc("2025-03-01T08:00:00Z"));
        let mut target = synced_copy(&source, "tgt-1", "2025-01-01T00:00:00Z");
        target.last_modified = Some(utc("2025-03-01T08:00:00Z"));

        // Upstream touched the event without changing content.
        source.last_modified = Some(utc("2025-03-02T08:00:00Z"));

        assert!(!needs_update(&source, &target));
    }

    #[test]
    fn recurrence_change_triggers_update() {
        use calsync_core::RecurrencePattern;

        let mut source = source_event("Choir Practice", "2025-03-03T18:00:00Z", None)
            .as_series_master(RecurrencePattern::weekly(1, &["monday"]));
        source.last_modified = Some(utc("2025-03-01T08:00:00Z"));

        let mut target = synced_copy(&source, "tgt-1", "2025-01-01T00:00:00Z");
        target.last_modified = Some(utc("2025-02-01T08:00:00Z"));

        // Same day-of-week set, different cadence.
        target.kind = EventKind::SeriesMaster {
            recurrence: RecurrencePattern::weekly(2, &["monday"]),
        };

        assert!(needs_update(&source, &target));
    }

    #[test]
    fn prepare_strips_private_details() {
        let source = source_event("Bake Sale", "2025-03-01T14:00:00Z", Some("Hall A"));
        let prepared = prepare_public_event(&source);

        assert!(prepared.location.is_none());
        assert!(prepared.body.contains("Hall A"));
        assert!(marker::is_managed(&prepared.body));
        assert_eq!(marker::source_id(&prepared.body), Some(source.id.as_str()));
        assert_eq!(prepared.show_as, ShowAs::Busy);
    }
}
