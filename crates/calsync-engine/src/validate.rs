//! Post-sync validation.
//!
//! After an execution pass the engine re-checks the target against the
//! source and reports anything a converged sync should never show:
//! missing mirrors, stale leftovers, duplicate signatures, and privacy
//! leaks on managed events. Validation never mutates; it only reports.

use std::collections::{HashMap, HashSet};

use calsync_core::{
    event_signature, marker, Event, EventTime, ShowAs, TimeWindow, PRIVATE_CATEGORIES,
};
use tracing::warn;

/// Allowed drift between eligible source count and managed mirror
/// count before it is reported. In-flight occurrence edits routinely
/// skew the totals by one or two.
const COUNT_TOLERANCE: usize = 2;

/// A single invariant violation found on the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    /// A sync-eligible source event has no managed counterpart.
    MissingMirror { subject: String },
    /// A managed target event no longer corresponds to any source event.
    StaleMirror { subject: String },
    /// Two or more managed target events share a signature.
    DuplicateSignature { signature: String, count: usize },
    /// A managed event still carries a location field.
    LocationLeak { subject: String },
    /// A managed event carries a private category label.
    PrivateCategoryLeak { subject: String, category: String },
    /// A managed event is not shown as busy.
    NotBusy { subject: String },
    /// A managed event's marker carries no source id.
    MarkerWithoutSourceId { subject: String },
    /// Eligible source count and managed mirror count diverge by more
    /// than the tolerance.
    CountMismatch { source: usize, managed: usize },
    /// A managed event starts outside the sync window.
    OutOfWindow { subject: String },
    /// A managed event's all-day flag disagrees with its time shape.
    AllDayMismatch { subject: String },
}

/// The outcome of one validation pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Checks the target calendar against the source events that should be
/// mirrored there. `window` is the sync range both sides were fetched
/// over.
pub fn validate(
    source_events: &[Event],
    target_events: &[Event],
    window: TimeWindow,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    let managed: Vec<&Event> = target_events
        .iter()
        .filter(|e| marker::is_managed(&e.body))
        .collect();

    let mut managed_signatures: HashMap<String, usize> = HashMap::new();
    for event in &managed {
        *managed_signatures.entry(event_signature(event)).or_insert(0) += 1;
    }

    for (signature, count) in &managed_signatures {
        if *count > 1 {
            report.issues.push(ValidationIssue::DuplicateSignature {
                signature: signature.clone(),
                count: *count,
            });
        }
    }

    let eligible: Vec<&Event> = source_events
        .iter()
        .filter(|e| e.is_sync_eligible() && !e.is_occurrence())
        .collect();
    let eligible_signatures: HashSet<String> =
        eligible.iter().map(|e| event_signature(e)).collect();
    let target_signatures: HashSet<String> =
        target_events.iter().map(event_signature).collect();

    for source in &eligible {
        if !target_signatures.contains(&event_signature(source)) {
            report.issues.push(ValidationIssue::MissingMirror {
                subject: source.subject.clone(),
            });
        }
    }

    for event in &managed {
        if !eligible_signatures.contains(&event_signature(event)) {
            report.issues.push(ValidationIssue::StaleMirror {
                subject: event.subject.clone(),
            });
        }
        if event.location.as_deref().is_some_and(|l| !l.is_empty()) {
            report.issues.push(ValidationIssue::LocationLeak {
                subject: event.subject.clone(),
            });
        }
        if event.show_as != ShowAs::Busy {
            report.issues.push(ValidationIssue::NotBusy {
                subject: event.subject.clone(),
            });
        }
        if marker::source_id(&event.body).is_none() {
            report.issues.push(ValidationIssue::MarkerWithoutSourceId {
                subject: event.subject.clone(),
            });
        }
        for private in PRIVATE_CATEGORIES {
            if event.categories.contains(*private) {
                report.issues.push(ValidationIssue::PrivateCategoryLeak {
                    subject: event.subject.clone(),
                    category: (*private).to_string(),
                });
            }
        }
        if !window.contains_time(&event.start) {
            report.issues.push(ValidationIssue::OutOfWindow {
                subject: event.subject.clone(),
            });
        }
        if event.is_all_day != matches!(event.start, EventTime::AllDay(_)) {
            report.issues.push(ValidationIssue::AllDayMismatch {
                subject: event.subject.clone(),
            });
        }
    }

    if eligible.len().abs_diff(managed.len()) > COUNT_TOLERANCE {
        report.issues.push(ValidationIssue::CountMismatch {
            source: eligible.len(),
            managed: managed.len(),
        });
    }

    if !report.is_clean() {
        warn!(issues = report.issues.len(), "post-sync validation found problems");
    }
    report
}
