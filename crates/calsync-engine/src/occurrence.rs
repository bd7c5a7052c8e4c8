//! Occurrence exception passes.
//!
//! Series masters sync through the main reconciliation; what it cannot
//! see is an individual instance that was cancelled or rescheduled.
//! These passes compare expanded instances inside a rolling window and
//! patch the target's instances to match.
//!
//! Instances match on normalized subject plus the normalized original
//! slot (the original start when the instance was rescheduled), so a
//! moved instance still pairs with its target counterpart.

use std::collections::{HashMap, HashSet};

use calsync_core::{marker, normalize_event_time, normalize_subject, Event, TimeWindow};
use calsync_store::EventStore;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::reconcile::prepare_public_event;
use crate::retry::RetryPolicy;

/// Counts from one exception pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct OccurrenceReport {
    pub cancelled: usize,
    pub rescheduled: usize,
    pub failures: usize,
}

fn exception_key(event: &Event) -> String {
    format!(
        "{}|{}",
        normalize_subject(&event.subject),
        normalize_event_time(event.occurrence_slot())
    )
}

pub struct OccurrenceSyncer<'a> {
    store: &'a dyn EventStore,
    retry: RetryPolicy,
}

impl<'a> OccurrenceSyncer<'a> {
    pub fn new(store: &'a dyn EventStore, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Runs the cancellation pass then the modification pass over the
    /// window. Individual instance failures are counted and skipped.
    pub async fn sync_exceptions(
        &self,
        source_id: &str,
        target_id: &str,
        window: TimeWindow,
    ) -> Result<OccurrenceReport, SyncError> {
        let source_instances = self
            .retry
            .run("get_occurrences(source)", || {
                self.store.get_occurrences(source_id, window)
            })
            .await?;
        let target_instances: Vec<Event> = self
            .retry
            .run("get_occurrences(target)", || {
                self.store.get_occurrences(target_id, window)
            })
            .await?
            .into_iter()
            .filter(|e| marker::is_managed(&e.body))
            .collect();

        let source_by_key: HashMap<String, &Event> = source_instances
            .iter()
            .map(|e| (exception_key(e), e))
            .collect();

        let mut report = OccurrenceReport::default();
        let mut removed_keys: HashSet<String> = HashSet::new();

        // Cancellation pass: a target instance whose source counterpart
        // is cancelled or gone must come off the public calendar.
        for target in &target_instances {
            let Some(series_id) = target.series_id() else {
                continue;
            };
            let key = exception_key(target);
            let gone = match source_by_key.get(&key) {
                Some(source) => source.is_cancelled(),
                None => true,
            };
            if !gone {
                continue;
            }

            let result = self
                .retry
                .run("delete_occurrence", || {
                    self.store
                        .delete_occurrence(target_id, series_id, target.occurrence_slot())
                })
                .await;
            match result {
                Ok(()) => {
                    debug!(subject = %target.subject, "removed cancelled instance");
                    removed_keys.insert(key);
                    report.cancelled += 1;
                }
                Err(err) => {
                    warn!(subject = %target.subject, %err, "failed to remove instance");
                    report.failures += 1;
                }
            }
        }

        // Modification pass: a surviving pair whose actual times
        // diverged gets the source times pushed over.
        let target_by_key: HashMap<String, &Event> = target_instances
            .iter()
            .map(|e| (exception_key(e), e))
            .filter(|(key, _)| !removed_keys.contains(key))
            .collect();

        for source in &source_instances {
            if source.is_cancelled() {
                continue;
            }
            let Some(target) = target_by_key.get(&exception_key(source)) else {
                continue;
            };
            let Some(series_id) = target.series_id() else {
                continue;
            };
            if source.start == target.start && source.end == target.end {
                continue;
            }

            let prepared = prepare_public_event(source);
            let result = self
                .retry
                .run("update_occurrence", || {
                    self.store.update_occurrence(
                        target_id,
                        series_id,
                        target.occurrence_slot(),
                        prepared.clone(),
                    )
                })
                .await;
            match result {
                Ok(()) => {
                    debug!(subject = %source.subject, "rescheduled instance");
                    report.rescheduled += 1;
                }
                Err(err) => {
                    warn!(subject = %source.subject, %err, "failed to reschedule instance");
                    report.failures += 1;
                }
            }
        }

        info!(
            cancelled = report.cancelled,
            rescheduled = report.rescheduled,
            failed = report.failures,
            "occurrence exception pass complete"
        );
        Ok(report)
    }
}
