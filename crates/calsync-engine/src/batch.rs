//! Batched execution of a planned operation set.
//!
//! Operations run in batches with a pause between them to stay inside
//! service throttling budgets. One failing event never aborts the run;
//! its error is recorded and the rest of the batch proceeds.

use std::time::Duration;

use calsync_core::Event;
use calsync_store::{EventStore, StoreError};
use tracing::{debug, error, info};

use crate::reconcile::{prepare_public_event, OperationSet};
use crate::retry::RetryPolicy;

/// What a failed operation was trying to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Add,
    Update,
    Delete,
}

/// A single operation that failed after retries.
#[derive(Debug)]
pub struct OpFailure {
    pub kind: OpKind,
    pub subject: String,
    pub error: StoreError,
}

/// Counts and failures from one execution pass.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub failures: Vec<OpFailure>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.added + self.updated + self.deleted
    }
}

pub struct BatchExecutor<'a> {
    store: &'a dyn EventStore,
    retry: RetryPolicy,
    batch_size: usize,
    pause: Duration,
}

impl<'a> BatchExecutor<'a> {
    pub fn new(
        store: &'a dyn EventStore,
        retry: RetryPolicy,
        batch_size: usize,
        pause: Duration,
    ) -> Self {
        Self {
            store,
            retry,
            batch_size: batch_size.max(1),
            pause,
        }
    }

    /// Applies the operation set to the target calendar. Deletes run
    /// first so duplicate cleanup lands before new content.
    pub async fn execute(&self, target_id: &str, ops: OperationSet) -> BatchReport {
        let mut report = BatchReport::default();

        self.run_deletes(target_id, &ops.to_delete, &mut report).await;
        self.run_adds(target_id, &ops.to_add, &mut report).await;
        self.run_updates(target_id, &ops.to_update, &mut report).await;

        info!(
            added = report.added,
            updated = report.updated,
            deleted = report.deleted,
            failed = report.failures.len(),
            "execution pass complete"
        );
        report
    }

    async fn run_deletes(&self, target_id: &str, events: &[Event], report: &mut BatchReport) {
        for (i, batch) in events.chunks(self.batch_size).enumerate() {
            if i > 0 {
                tokio::time::sleep(self.pause).await;
            }
            for event in batch {
                let result = self
                    .retry
                    .run("delete_event", || {
                        self.store.delete_event(target_id, &event.id)
                    })
                    .await;
                match result {
                    Ok(()) => {
                        debug!(subject = %event.subject, "deleted target event");
                        report.deleted += 1;
                    }
                    Err(err) => record_failure(report, OpKind::Delete, event, err),
                }
            }
        }
    }

    async fn run_adds(&self, target_id: &str, events: &[Event], report: &mut BatchReport) {
        for (i, batch) in events.chunks(self.batch_size).enumerate() {
            if i > 0 {
                tokio::time::sleep(self.pause).await;
            }
            for event in batch {
                let prepared = prepare_public_event(event);
                let result = self
                    .retry
                    .run("create_event", || {
                        self.store.create_event(target_id, prepared.clone())
                    })
                    .await;
                match result {
                    Ok(id) => {
                        debug!(subject = %event.subject, %id, "created target event");
                        report.added += 1;
                    }
                    Err(err) => record_failure(report, OpKind::Add, event, err),
                }
            }
        }
    }

    async fn run_updates(
        &self,
        target_id: &str,
        pairs: &[(Event, Event)],
        report: &mut BatchReport,
    ) {
        for (i, batch) in pairs.chunks(self.batch_size).enumerate() {
            if i > 0 {
                tokio::time::sleep(self.pause).await;
            }
            for (source, target) in batch {
                let prepared = prepare_public_event(source);
                let result = self
                    .retry
                    .run("update_event", || {
                        self.store
                            .update_event(target_id, &target.id, prepared.clone())
                    })
                    .await;
                match result {
                    Ok(()) => {
                        debug!(subject = %source.subject, "updated target event");
                        report.updated += 1;
                    }
                    Err(err) => record_failure(report, OpKind::Update, source, err),
                }
            }
        }
    }
}

fn record_failure(report: &mut BatchReport, kind: OpKind, event: &Event, error: StoreError) {
    error!(subject = %event.subject, ?kind, %error, "operation failed after retries");
    report.failures.push(OpFailure {
        kind,
        subject: event.subject.clone(),
        error,
    });
}
