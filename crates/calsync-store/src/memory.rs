//! In-memory event store.
//!
//! Backs the engine's tests: seeds calendars with events and expanded
//! occurrence instances, counts operations, and can inject transient
//! failures to exercise the retry and circuit-breaker paths.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use calsync_core::{Event, EventKind, EventTime, TimeWindow};

use crate::error::{StoreError, StoreResult};
use crate::store::{BoxFuture, EventStore};

/// Counts of operations the store has served, for test assertions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpCounts {
    pub lists: u64,
    pub creates: u64,
    pub updates: u64,
    pub deletes: u64,
    pub occurrence_lists: u64,
    pub occurrence_deletes: u64,
    pub occurrence_updates: u64,
}

#[derive(Default)]
struct Inner {
    /// Calendar display name -> calendar id.
    calendars: HashMap<String, String>,
    /// Calendar id -> events (singles and series masters).
    events: HashMap<String, Vec<Event>>,
    /// Calendar id -> expanded occurrence instances.
    occurrences: HashMap<String, Vec<Event>>,
    /// Remaining calls to fail with a transient error.
    fail_next: u32,
    counts: OpCounts,
}

/// An [`EventStore`] backed by process memory.
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a calendar and returns its id.
    pub fn add_calendar(&self, name: impl Into<String>) -> String {
        let name = name.into();
        let id = format!("cal-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut inner = self.inner.lock().expect("store lock");
        inner.calendars.insert(name, id.clone());
        inner.events.entry(id.clone()).or_default();
        inner.occurrences.entry(id.clone()).or_default();
        id
    }

    /// Registers a second display name for an existing calendar id.
    /// Used to simulate the source and target resolving identically.
    pub fn alias_calendar(&self, name: impl Into<String>, id: impl Into<String>) {
        let mut inner = self.inner.lock().expect("store lock");
        inner.calendars.insert(name.into(), id.into());
    }

    /// Seeds events into a calendar.
    pub fn seed_events(&self, calendar_id: &str, events: Vec<Event>) {
        let mut inner = self.inner.lock().expect("store lock");
        inner
            .events
            .entry(calendar_id.to_string())
            .or_default()
            .extend(events);
    }

    /// Seeds expanded occurrence instances into a calendar.
    pub fn seed_occurrences(&self, calendar_id: &str, instances: Vec<Event>) {
        let mut inner = self.inner.lock().expect("store lock");
        inner
            .occurrences
            .entry(calendar_id.to_string())
            .or_default()
            .extend(instances);
    }

    /// Makes the next `n` operations fail with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.inner.lock().expect("store lock").fail_next = n;
    }

    /// Snapshot of a calendar's events.
    pub fn events(&self, calendar_id: &str) -> Vec<Event> {
        self.inner
            .lock()
            .expect("store lock")
            .events
            .get(calendar_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of a calendar's occurrence instances.
    pub fn occurrences(&self, calendar_id: &str) -> Vec<Event> {
        self.inner
            .lock()
            .expect("store lock")
            .occurrences
            .get(calendar_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Operation counts served so far.
    pub fn counts(&self) -> OpCounts {
        self.inner.lock().expect("store lock").counts
    }

    fn check_failure(inner: &mut Inner) -> StoreResult<()> {
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(StoreError::network("injected transient failure"));
        }
        Ok(())
    }
}

impl EventStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn find_calendar<'a>(&'a self, name: &'a str) -> BoxFuture<'a, StoreResult<String>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().expect("store lock");
            Self::check_failure(&mut inner)?;
            inner
                .calendars
                .get(name)
                .cloned()
                .ok_or_else(|| StoreError::calendar_not_found(name))
        })
    }

    fn list_events<'a>(
        &'a self,
        calendar_id: &'a str,
        window: TimeWindow,
    ) -> BoxFuture<'a, StoreResult<Vec<Event>>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().expect("store lock");
            Self::check_failure(&mut inner)?;
            inner.counts.lists += 1;
            let events = inner
                .events
                .get(calendar_id)
                .ok_or_else(|| StoreError::calendar_not_found(calendar_id))?;
            Ok(events
                .iter()
                .filter(|e| window.contains_time(&e.start))
                .cloned()
                .collect())
        })
    }

    fn create_event<'a>(
        &'a self,
        calendar_id: &'a str,
        mut event: Event,
    ) -> BoxFuture<'a, StoreResult<String>> {
        Box::pin(async move {
            let id = format!("ev-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
            let mut inner = self.inner.lock().expect("store lock");
            Self::check_failure(&mut inner)?;
            inner.counts.creates += 1;
            event.id = id.clone();
            if event.created_at.is_none() {
                event.created_at = Some(chrono::Utc::now());
            }
            inner
                .events
                .get_mut(calendar_id)
                .ok_or_else(|| StoreError::calendar_not_found(calendar_id))?
                .push(event);
            Ok(id)
        })
    }

    fn update_event<'a>(
        &'a self,
        calendar_id: &'a str,
        event_id: &'a str,
        event: Event,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().expect("store lock");
            Self::check_failure(&mut inner)?;
            inner.counts.updates += 1;
            let events = inner
                .events
                .get_mut(calendar_id)
                .ok_or_else(|| StoreError::calendar_not_found(calendar_id))?;
            let slot = events
                .iter_mut()
                .find(|e| e.id == event_id)
                .ok_or_else(|| StoreError::event_not_found(event_id))?;
            let id = slot.id.clone();
            let created_at = slot.created_at;
            *slot = event;
            slot.id = id;
            slot.created_at = created_at;
            Ok(())
        })
    }

    fn delete_event<'a>(
        &'a self,
        calendar_id: &'a str,
        event_id: &'a str,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().expect("store lock");
            Self::check_failure(&mut inner)?;
            inner.counts.deletes += 1;
            let events = inner
                .events
                .get_mut(calendar_id)
                .ok_or_else(|| StoreError::calendar_not_found(calendar_id))?;
            let before = events.len();
            events.retain(|e| e.id != event_id);
            if events.len() == before {
                return Err(StoreError::event_not_found(event_id));
            }
            Ok(())
        })
    }

    fn get_occurrences<'a>(
        &'a self,
        calendar_id: &'a str,
        window: TimeWindow,
    ) -> BoxFuture<'a, StoreResult<Vec<Event>>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().expect("store lock");
            Self::check_failure(&mut inner)?;
            inner.counts.occurrence_lists += 1;
            let instances = inner
                .occurrences
                .get(calendar_id)
                .ok_or_else(|| StoreError::calendar_not_found(calendar_id))?;
            Ok(instances
                .iter()
                .filter(|e| window.contains_time(&e.start))
                .cloned()
                .collect())
        })
    }

    fn delete_occurrence<'a>(
        &'a self,
        calendar_id: &'a str,
        series_id: &'a str,
        occurrence_slot: &'a EventTime,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().expect("store lock");
            Self::check_failure(&mut inner)?;
            inner.counts.occurrence_deletes += 1;
            let instances = inner
                .occurrences
                .get_mut(calendar_id)
                .ok_or_else(|| StoreError::calendar_not_found(calendar_id))?;
            let before = instances.len();
            instances.retain(|e| {
                !(e.series_id() == Some(series_id) && e.occurrence_slot() == occurrence_slot)
            });
            if instances.len() == before {
                return Err(StoreError::event_not_found(format!(
                    "{series_id} occurrence"
                )));
            }
            Ok(())
        })
    }

    fn update_occurrence<'a>(
        &'a self,
        calendar_id: &'a str,
        series_id: &'a str,
        occurrence_slot: &'a EventTime,
        event: Event,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().expect("store lock");
            Self::check_failure(&mut inner)?;
            inner.counts.occurrence_updates += 1;
            let instances = inner
                .occurrences
                .get_mut(calendar_id)
                .ok_or_else(|| StoreError::calendar_not_found(calendar_id))?;
            let slot = instances
                .iter_mut()
                .find(|e| {
                    e.series_id() == Some(series_id) && e.occurrence_slot() == occurrence_slot
                })
                .ok_or_else(|| StoreError::event_not_found(format!("{series_id} occurrence")))?;
            let id = slot.id.clone();
            let kind = slot.kind.clone();
            *slot = event;
            slot.id = id;
            // The instance stays an occurrence of the same series.
            if matches!(slot.kind, EventKind::Single) {
                slot.kind = kind;
            }
            Ok(())
        })
    }
}
