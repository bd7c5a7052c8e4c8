//! Bounded in-memory history of sync runs, with statistics for status
//! reporting.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// All planned operations applied.
    Success,
    /// Some operations applied, some failed.
    Partial,
    /// The run aborted before or during execution.
    Failed,
    /// Valid cache and no source changes: nothing to do.
    Skipped,
}

/// One completed (or aborted) sync run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRecord {
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub outcome: SyncOutcome,
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub occurrences_cancelled: usize,
    pub occurrences_rescheduled: usize,
    pub failures: usize,
    /// Human-readable detail for failed runs.
    pub detail: Option<String>,
}

/// Aggregates over a set of sync records.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStats {
    pub runs: usize,
    pub successes: usize,
    pub partials: usize,
    pub failures: usize,
    pub skips: usize,
    /// Successes and skips over all runs, in `[0, 1]`. 1.0 when empty.
    pub success_rate: f64,
    pub last_success: Option<DateTime<Utc>>,
    pub mean_duration: Duration,
    pub p95_duration: Duration,
    pub events_added: usize,
    pub events_updated: usize,
    pub events_deleted: usize,
    /// Runs per hour bucket, keyed `YYYY-MM-DDTHH`.
    pub hourly: BTreeMap<String, usize>,
}

/// Ring of the most recent sync records.
#[derive(Debug)]
pub struct SyncHistory {
    records: VecDeque<SyncRecord>,
    capacity: usize,
}

impl Default for SyncHistory {
    fn default() -> Self {
        Self::new(100)
    }
}

impl SyncHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, record: SyncRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn last(&self) -> Option<&SyncRecord> {
        self.records.back()
    }

    pub fn records(&self) -> impl Iterator<Item = &SyncRecord> {
        self.records.iter()
    }

    /// Statistics over everything retained.
    pub fn stats(&self) -> SyncStats {
        aggregate(self.records.iter())
    }

    /// Statistics over runs started within the past `hours` hours.
    pub fn stats_since(&self, hours: i64) -> SyncStats {
        let cutoff = Utc::now() - chrono::Duration::hours(hours);
        aggregate(self.records.iter().filter(|r| r.started_at >= cutoff))
    }
}

fn aggregate<'a>(records: impl Iterator<Item = &'a SyncRecord>) -> SyncStats {
    let mut stats = SyncStats {
        runs: 0,
        successes: 0,
        partials: 0,
        failures: 0,
        skips: 0,
        success_rate: 1.0,
        last_success: None,
        mean_duration: Duration::ZERO,
        p95_duration: Duration::ZERO,
        events_added: 0,
        events_updated: 0,
        events_deleted: 0,
        hourly: BTreeMap::new(),
    };

    let mut durations: Vec<Duration> = Vec::new();
    for record in records {
        stats.runs += 1;
        match record.outcome {
            SyncOutcome::Success => {
                stats.successes += 1;
                stats.last_success = Some(record.started_at);
            }
            SyncOutcome::Partial => stats.partials += 1,
            SyncOutcome::Failed => stats.failures += 1,
            SyncOutcome::Skipped => stats.skips += 1,
        }
        stats.events_added += record.added;
        stats.events_updated += record.updated;
        stats.events_deleted += record.deleted;
        durations.push(record.duration);
        *stats
            .hourly
            .entry(record.started_at.format("%Y-%m-%dT%H").to_string())
            .or_insert(0) += 1;
    }

    if stats.runs > 0 {
        stats.success_rate = (stats.successes + stats.skips) as f64 / stats.runs as f64;
        let total: Duration = durations.iter().sum();
        stats.mean_duration = total / stats.runs as u32;
        durations.sort();
        // Nearest-rank p95.
        let rank = ((stats.runs as f64) * 0.95).ceil() as usize;
        stats.p95_duration = durations[rank.clamp(1, stats.runs) - 1];
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_at(
        started_at: DateTime<Utc>,
        outcome: SyncOutcome,
        added: usize,
        millis: u64,
    ) -> SyncRecord {
        SyncRecord {
            started_at,
            duration: Duration::from_millis(millis),
            outcome,
            added,
            updated: 0,
            deleted: 0,
            occurrences_cancelled: 0,
            occurrences_rescheduled: 0,
            failures: 0,
            detail: None,
        }
    }

    fn record(outcome: SyncOutcome, added: usize) -> SyncRecord {
        record_at(Utc::now(), outcome, added, 10)
    }

    #[test]
    fn stats_aggregate_outcomes() {
        let mut history = SyncHistory::new(10);
        history.record(record(SyncOutcome::Success, 3));
        history.record(record(SyncOutcome::Skipped, 0));
        history.record(record(SyncOutcome::Failed, 0));
        history.record(record(SyncOutcome::Partial, 1));

        let stats = history.stats();
        assert_eq!(stats.runs, 4);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.skips, 1);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.partials, 1);
        assert_eq!(stats.events_added, 4);
        assert!((stats.success_rate - 0.5).abs() < 1e-9);
        assert!(stats.last_success.is_some());
        assert_eq!(stats.hourly.values().sum::<usize>(), 4);
    }

    #[test]
    fn duration_percentiles() {
        let mut history = SyncHistory::new(30);
        for millis in [10, 20, 30, 40, 50, 60, 70, 80, 90, 1000] {
            history.record(record_at(Utc::now(), SyncOutcome::Success, 0, millis));
        }

        let stats = history.stats();
        assert_eq!(stats.mean_duration, Duration::from_millis(145));
        assert_eq!(stats.p95_duration, Duration::from_millis(1000));
    }

    #[test]
    fn stats_since_filters_by_window() {
        let mut history = SyncHistory::new(10);
        history.record(record_at(
            Utc::now() - chrono::Duration::hours(30),
            SyncOutcome::Success,
            5,
            10,
        ));
        history.record(record(SyncOutcome::Success, 1));

        let day = history.stats_since(24);
        assert_eq!(day.runs, 1);
        assert_eq!(day.events_added, 1);
        assert_eq!(history.stats().runs, 2);
    }

    #[test]
    fn history_is_bounded() {
        let mut history = SyncHistory::new(2);
        history.record(record(SyncOutcome::Success, 1));
        history.record(record(SyncOutcome::Success, 2));
        history.record(record(SyncOutcome::Success, 3));

        assert_eq!(history.stats().runs, 2);
        assert_eq!(history.last().unwrap().added, 3);
        assert_eq!(history.records().next().unwrap().added, 2);
    }

    #[test]
    fn empty_history_has_neutral_stats() {
        let stats = SyncHistory::default().stats();
        assert_eq!(stats.runs, 0);
        assert!((stats.success_rate - 1.0).abs() < 1e-9);
        assert_eq!(stats.p95_duration, Duration::ZERO);
    }
}
