//! The sync engine: orchestrates one full reconciliation run.
//!
//! A run gates through the circuit breaker and rate limiter, resolves
//! both calendars, fetches events in week-sized chunks, consults the
//! change cache for a cheap exit, plans and executes operations in
//! batches, patches occurrence exceptions, refreshes the cache, and
//! audits the result. Only one run may be active at a time; concurrent
//! triggers are rejected, not queued.
//!
//! The engine owns all of its mutable state explicitly: breaker,
//! limiter, cache, and history live inside the instance, never in
//! globals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use calsync_core::{Event, TimeWindow};
use calsync_store::EventStore;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::batch::BatchExecutor;
use crate::breaker::{CircuitBreaker, CircuitState};
use crate::cache::{CacheStats, ChangeCache};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::history::{SyncHistory, SyncOutcome, SyncRecord, SyncStats};
use crate::occurrence::OccurrenceSyncer;
use crate::ratelimit::RateLimiter;
use crate::reconcile;
use crate::retry::RetryPolicy;
use crate::validate;

/// The result of one sync run. In dry-run mode the counts are the
/// planned operations; nothing was executed.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub occurrences_cancelled: usize,
    pub occurrences_rescheduled: usize,
    pub failures: usize,
    pub validation_issues: usize,
    pub duration: Duration,
    pub dry_run: bool,
}

/// Engine state snapshot for status endpoints.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub last_sync_time: Option<DateTime<Utc>>,
    pub in_progress: bool,
    pub circuit_state: CircuitState,
    pub rate_remaining: usize,
    pub cache: CacheStats,
}

struct EngineState {
    breaker: CircuitBreaker,
    limiter: RateLimiter,
    cache: ChangeCache,
    history: SyncHistory,
    last_sync_time: Option<DateTime<Utc>>,
}

pub struct SyncEngine {
    store: Arc<dyn EventStore>,
    config: SyncConfig,
    state: Mutex<EngineState>,
    in_progress: AtomicBool,
}

/// Clears the in-progress flag when a run ends, on every exit path.
#[derive(Debug)]
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncEngine {
    /// Builds an engine, loading the change cache from its configured
    /// path.
    pub fn new(store: Arc<dyn EventStore>, config: SyncConfig) -> Self {
        let cache = ChangeCache::load(&config.cache_path);
        let state = EngineState {
            breaker: CircuitBreaker::from_config(&config),
            limiter: RateLimiter::per_hour(config.max_syncs_per_hour),
            cache,
            history: SyncHistory::default(),
            last_sync_time: None,
        };
        Self {
            store,
            config,
            state: Mutex::new(state),
            in_progress: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Runs one full sync. Rejected immediately if another run is
    /// active, the circuit is open, or the hourly budget is spent.
    pub async fn sync_calendars(&self) -> Result<SyncReport, SyncError> {
        let _guard = self.try_begin()?;

        {
            let mut state = self.lock_state();
            state.breaker.try_acquire()?;
            state.limiter.try_acquire()?;
        }

        let started_at = Utc::now();
        let started = Instant::now();
        let result = self.do_sync().await;

        let mut state = self.lock_state();
        match &result {
            Ok(report) => {
                state.breaker.record_success();
                state.last_sync_time = Some(started_at);
                state.history.record(SyncRecord {
                    started_at,
                    duration: started.elapsed(),
                    outcome: report.outcome,
                    added: report.added,
                    updated: report.updated,
                    deleted: report.deleted,
                    occurrences_cancelled: report.occurrences_cancelled,
                    occurrences_rescheduled: report.occurrences_rescheduled,
                    failures: report.failures,
                    detail: None,
                });
            }
            Err(err) => {
                if !err.is_fail_fast() {
                    state.breaker.record_failure();
                }
                error!(%err, "sync run failed");
                state.history.record(SyncRecord {
                    started_at,
                    duration: started.elapsed(),
                    outcome: SyncOutcome::Failed,
                    added: 0,
                    updated: 0,
                    deleted: 0,
                    occurrences_cancelled: 0,
                    occurrences_rescheduled: 0,
                    failures: 0,
                    detail: Some(err.to_string()),
                });
            }
        }

        result.map(|mut report| {
            report.duration = started.elapsed();
            report
        })
    }

    /// Current engine state for status reporting.
    pub fn status(&self) -> EngineStatus {
        let state = self.lock_state();
        EngineStatus {
            last_sync_time: state.last_sync_time,
            in_progress: self.in_progress.load(Ordering::SeqCst),
            circuit_state: state.breaker.state(),
            rate_remaining: state.limiter.remaining(),
            cache: state.cache.stats(),
        }
    }

    /// Aggregates over the retained run history.
    pub fn stats(&self) -> SyncStats {
        self.lock_state().history.stats()
    }

    /// Aggregates over runs started within the past `hours` hours.
    pub fn stats_since(&self, hours: i64) -> SyncStats {
        self.lock_state().history.stats_since(hours)
    }

    /// Clones the retained run records, oldest first.
    pub fn history(&self) -> Vec<SyncRecord> {
        self.lock_state().history.records().cloned().collect()
    }

    /// Drops the change cache, in memory and on disk, forcing the next
    /// run to reconcile fully.
    pub fn clear_cache(&self) -> Result<(), SyncError> {
        let mut state = self.lock_state();
        state.cache.clear();
        state.cache.save(&self.config.cache_path)
    }

    fn try_begin(&self) -> Result<RunGuard<'_>, SyncError> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::SyncInProgress);
        }
        Ok(RunGuard(&self.in_progress))
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, EngineState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn do_sync(&self) -> Result<SyncReport, SyncError> {
        let retry = RetryPolicy::from_config(&self.config);

        let source_id = self
            .resolve_calendar(&self.config.source_calendar, &retry)
            .await?;
        let target_id = self
            .resolve_calendar(&self.config.target_calendar, &retry)
            .await?;

        if source_id == target_id {
            error!(
                source = %self.config.source_calendar,
                target = %self.config.target_calendar,
                "source and target resolve to the same calendar"
            );
            return Err(SyncError::SafetyAbort);
        }

        let window =
            TimeWindow::around_now(self.config.sync_cutoff_days, self.config.sync_lookahead_days);

        let source_events: Vec<Event> = self
            .fetch_events(&source_id, window, &retry)
            .await?
            .into_iter()
            .filter(|e| e.is_sync_eligible())
            .collect();
        info!(count = source_events.len(), "fetched eligible source events");

        // A valid cache with no source-side changes means the target's
        // event list is already converged; skip the target fetch. The
        // occurrence exception pass still runs: instance edits never
        // land in the change cache, so a cancelled or moved occurrence
        // of an unchanged series is invisible to it.
        let skip_reconcile = {
            let state = self.lock_state();
            state.cache.is_valid(self.config.cache_ttl)
                && state.cache.detect_changes(&source_events).is_empty()
        };
        if skip_reconcile {
            info!("no source changes since last sync; skipping reconciliation");
            let mut report = SyncReport {
                outcome: SyncOutcome::Skipped,
                added: 0,
                updated: 0,
                deleted: 0,
                occurrences_cancelled: 0,
                occurrences_rescheduled: 0,
                failures: 0,
                validation_issues: 0,
                duration: Duration::ZERO,
                dry_run: self.config.dry_run,
            };
            if self.config.sync_occurrence_exceptions && !self.config.dry_run {
                let occ_window =
                    TimeWindow::occurrence_window(self.config.occurrence_sync_days);
                let occ_report = OccurrenceSyncer::new(self.store.as_ref(), retry)
                    .sync_exceptions(&source_id, &target_id, occ_window)
                    .await?;
                report.occurrences_cancelled = occ_report.cancelled;
                report.occurrences_rescheduled = occ_report.rescheduled;
                report.failures = occ_report.failures;
            }
            return Ok(report);
        }

        let target_events = self.fetch_events(&target_id, window, &retry).await?;
        let ops = reconcile::plan(&source_events, &target_events);
        info!(
            add = ops.to_add.len(),
            update = ops.to_update.len(),
            delete = ops.to_delete.len(),
            "reconciliation planned"
        );

        if self.config.dry_run {
            return Ok(SyncReport {
                outcome: SyncOutcome::Success,
                added: ops.to_add.len(),
                updated: ops.to_update.len(),
                deleted: ops.to_delete.len(),
                occurrences_cancelled: 0,
                occurrences_rescheduled: 0,
                failures: 0,
                validation_issues: 0,
                duration: Duration::ZERO,
                dry_run: true,
            });
        }

        let executor = BatchExecutor::new(
            self.store.as_ref(),
            retry,
            self.config.batch_size,
            self.config.batch_pause,
        );
        let batch_report = executor.execute(&target_id, ops).await;

        let mut occurrences_cancelled = 0;
        let mut occurrences_rescheduled = 0;
        let mut failures = batch_report.failures.len();
        if self.config.sync_occurrence_exceptions {
            let occ_window = TimeWindow::occurrence_window(self.config.occurrence_sync_days);
            let occ_report = OccurrenceSyncer::new(self.store.as_ref(), retry)
                .sync_exceptions(&source_id, &target_id, occ_window)
                .await?;
            occurrences_cancelled = occ_report.cancelled;
            occurrences_rescheduled = occ_report.rescheduled;
            failures += occ_report.failures;
        }

        {
            let mut state = self.lock_state();
            state.cache.record_sync(&source_events);
            if let Err(err) = state.cache.save(&self.config.cache_path) {
                warn!(%err, "failed to persist change cache");
            }
        }

        let mut validation_issues = 0;
        if self.config.validate_after_sync {
            let refetched = self.fetch_events(&target_id, window, &retry).await?;
            validation_issues = validate::validate(&source_events, &refetched, window)
                .issues
                .len();
        }

        let succeeded = batch_report.succeeded();
        let outcome = if failures == 0 {
            SyncOutcome::Success
        } else if succeeded >= failures {
            SyncOutcome::Partial
        } else {
            SyncOutcome::Failed
        };

        Ok(SyncReport {
            outcome,
            added: batch_report.added,
            updated: batch_report.updated,
            deleted: batch_report.deleted,
            occurrences_cancelled,
            occurrences_rescheduled,
            failures,
            validation_issues,
            duration: Duration::ZERO,
            dry_run: false,
        })
    }

    async fn resolve_calendar(
        &self,
        name: &str,
        retry: &RetryPolicy,
    ) -> Result<String, SyncError> {
        retry
            .run("find_calendar", || self.store.find_calendar(name))
            .await
            .map_err(|err| match err.code() {
                calsync_store::StoreErrorCode::CalendarNotFound => {
                    SyncError::CalendarNotFound(name.to_string())
                }
                _ => SyncError::Store(err),
            })
    }

    /// Lists a calendar window one week at a time; upstream APIs cap
    /// the range of a single call.
    async fn fetch_events(
        &self,
        calendar_id: &str,
        window: TimeWindow,
        retry: &RetryPolicy,
    ) -> Result<Vec<Event>, SyncError> {
        let mut events = Vec::new();
        for chunk in window.weekly_chunks() {
            let batch = retry
                .run("list_events", || self.store.list_events(calendar_id, chunk))
                .await?;
            events.extend(batch);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calsync_core::{marker, EventKind, EventTime, ShowAs, PUBLIC_CATEGORY};
    use calsync_store::InMemoryStore;
    use chrono::Duration as ChronoDuration;

    fn public_event(subject: &str, hours_from_now: i64) -> Event {
        let start = Utc::now() + ChronoDuration::hours(hours_from_now);
        Event::new(
            format!("src-{subject}"),
            subject,
            EventTime::from_utc(start),
            EventTime::from_utc(start + ChronoDuration::hours(1)),
        )
        .with_location("Hall A")
        .with_category(PUBLIC_CATEGORY)
        .with_show_as(ShowAs::Busy)
    }

    fn private_event(subject: &str, hours_from_now: i64) -> Event {
        let start = Utc::now() + ChronoDuration::hours(hours_from_now);
        Event::new(
            format!("src-{subject}"),
            subject,
            EventTime::from_utc(start),
            EventTime::from_utc(start + ChronoDuration::hours(1)),
        )
        .with_show_as(ShowAs::Busy)
    }

    fn test_config(dir: &tempfile::TempDir) -> SyncConfig {
        SyncConfig::new("Calendar", "Public Calendar")
            .with_cache_path(dir.path().join("cache.json"))
            .with_retries(
                1,
                Duration::from_millis(10),
                Duration::from_millis(20),
            )
            .with_batching(10, Duration::from_millis(1))
    }

    fn seeded_engine(config: SyncConfig) -> (Arc<InMemoryStore>, SyncEngine, String, String) {
        let store = Arc::new(InMemoryStore::new());
        let src = store.add_calendar("Calendar");
        let tgt = store.add_calendar("Public Calendar");
        let engine = SyncEngine::new(store.clone(), config);
        (store, engine, src, tgt)
    }

    #[tokio::test(start_paused = true)]
    async fn full_sync_mirrors_only_eligible_events() {
        let dir = tempfile::tempdir().unwrap();
        let (store, engine, src, tgt) = seeded_engine(test_config(&dir));

        store.seed_events(
            &src,
            vec![
                public_event("Bake Sale", 24),
                public_event("Mass", 48),
                private_event("Staff Meeting", 24),
                public_event("Tentative Social", 72).with_show_as(ShowAs::Tentative),
            ],
        );

        let report = engine.sync_calendars().await.unwrap();
        assert_eq!(report.outcome, SyncOutcome::Success);
        assert_eq!(report.added, 2);
        assert_eq!(report.failures, 0);
        assert_eq!(report.validation_issues, 0);

        let published = store.events(&tgt);
        assert_eq!(published.len(), 2);
        for event in &published {
            assert!(marker::is_managed(&event.body));
            assert!(event.location.is_none());
            assert_eq!(event.show_as, ShowAs::Busy);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn second_run_with_no_changes_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (store, engine, src, _tgt) = seeded_engine(test_config(&dir));
        store.seed_events(&src, vec![public_event("Bake Sale", 24)]);

        let first = engine.sync_calendars().await.unwrap();
        assert_eq!(first.outcome, SyncOutcome::Success);
        let creates_after_first = store.counts().creates;
        let lists_after_first = store.counts().lists;

        let second = engine.sync_calendars().await.unwrap();
        assert_eq!(second.outcome, SyncOutcome::Skipped);
        assert_eq!(store.counts().creates, creates_after_first);

        // The skip only fetched the source side.
        let source_chunks = TimeWindow::around_now(90, 180).weekly_chunks().len() as u64;
        assert_eq!(store.counts().lists, lists_after_first + source_chunks);
    }

    #[tokio::test(start_paused = true)]
    async fn skipped_run_still_applies_occurrence_exceptions() {
        let dir = tempfile::tempdir().unwrap();
        let (store, engine, src, tgt) = seeded_engine(test_config(&dir));
        store.seed_events(&src, vec![public_event("Choir Practice", 24)]);

        let first = engine.sync_calendars().await.unwrap();
        assert_eq!(first.outcome, SyncOutcome::Success);

        // One instance of an unchanged series is cancelled upstream.
        // The master never changes, so the change cache sees nothing.
        let start = Utc::now() + ChronoDuration::hours(48);
        let mut cancelled = Event::new(
            "src-inst",
            "Choir Practice",
            EventTime::from_utc(start),
            EventTime::from_utc(start + ChronoDuration::hours(1)),
        )
        .as_occurrence(Some("m1".into()), None);
        if let EventKind::Occurrence { is_cancelled, .. } = &mut cancelled.kind {
            *is_cancelled = true;
        }
        let mirror = Event::new(
            "tgt-inst",
            "Choir Practice",
            EventTime::from_utc(start),
            EventTime::from_utc(start + ChronoDuration::hours(1)),
        )
        .as_occurrence(Some("m1".into()), None)
        .with_body(marker::embed("", "src-master"));

        store.seed_occurrences(&src, vec![cancelled]);
        store.seed_occurrences(&tgt, vec![mirror]);

        let second = engine.sync_calendars().await.unwrap();
        assert_eq!(second.outcome, SyncOutcome::Skipped);
        assert_eq!(second.occurrences_cancelled, 1);
        assert!(store.occurrences(&tgt).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_cache_forces_full_reconciliation() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let (store, engine, src, _tgt) = seeded_engine(SyncConfig {
            cache_ttl: Duration::from_secs(0),
            ..config
        });
        store.seed_events(&src, vec![public_event("Bake Sale", 24)]);

        engine.sync_calendars().await.unwrap();
        let lists_after_first = store.counts().lists;

        // TTL zero: the cache never validates, so the target is fetched
        // again even though nothing changed.
        let second = engine.sync_calendars().await.unwrap();
        assert_eq!(second.outcome, SyncOutcome::Success);
        assert_eq!(second.added, 0);
        let source_chunks = TimeWindow::around_now(90, 180).weekly_chunks().len() as u64;
        assert!(store.counts().lists >= lists_after_first + 2 * source_chunks);
    }

    #[tokio::test(start_paused = true)]
    async fn sync_converges_and_stays_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (store, engine, src, tgt) = seeded_engine(test_config(&dir));
        store.seed_events(
            &src,
            vec![public_event("Bake Sale", 24), public_event("Mass", 48)],
        );

        engine.sync_calendars().await.unwrap();
        engine.clear_cache().unwrap();

        // Cache cleared: full reconciliation runs again and finds
        // nothing to do.
        let report = engine.sync_calendars().await.unwrap();
        assert_eq!(report.outcome, SyncOutcome::Success);
        assert_eq!(report.added + report.updated + report.deleted, 0);
        assert_eq!(store.events(&tgt).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_source_event_is_removed_from_target() {
        let dir = tempfile::tempdir().unwrap();
        let (store, engine, src, tgt) = seeded_engine(test_config(&dir));
        store.seed_events(
            &src,
            vec![public_event("Bake Sale", 24), public_event("Old Fair", 48)],
        );

        engine.sync_calendars().await.unwrap();
        assert_eq!(store.events(&tgt).len(), 2);

        // Drop one source event and force a full pass.
        let dropped = store.events(&src)[1].clone();
        store.delete_event(&src, &dropped.id).await.unwrap();
        engine.clear_cache().unwrap();

        let report = engine.sync_calendars().await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(store.events(&tgt).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dry_run_reports_without_mutating() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir).with_dry_run(true);
        let (store, engine, src, tgt) = seeded_engine(config);
        store.seed_events(&src, vec![public_event("Bake Sale", 24)]);

        let report = engine.sync_calendars().await.unwrap();
        assert!(report.dry_run);
        assert_eq!(report.added, 1);
        assert_eq!(store.counts().creates, 0);
        assert!(store.events(&tgt).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn same_calendar_pair_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryStore::new());
        let src = store.add_calendar("Calendar");
        store.alias_calendar("Public Calendar", src.clone());
        let engine = SyncEngine::new(store, test_config(&dir));

        let err = engine.sync_calendars().await.unwrap_err();
        assert!(matches!(err, SyncError::SafetyAbort));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_rejects_past_the_budget() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir).with_max_syncs_per_hour(1);
        let (_store, engine, _src, _tgt) = seeded_engine(config);

        engine.sync_calendars().await.unwrap();
        let err = engine.sync_calendars().await.unwrap_err();
        assert!(matches!(err, SyncError::RateLimitExceeded { .. }));
        assert!(err.is_fail_fast());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_failures_open_the_circuit() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir).with_breaker(2, Duration::from_secs(300), 1);
        let (store, engine, _src, _tgt) = seeded_engine(config);

        for _ in 0..2 {
            store.fail_next(10);
            let err = engine.sync_calendars().await.unwrap_err();
            assert!(!err.is_fail_fast());
            store.fail_next(0);
        }
        assert_eq!(engine.status().circuit_state, CircuitState::Open);

        let err = engine.sync_calendars().await.unwrap_err();
        assert!(matches!(err, SyncError::CircuitOpen));
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_run_at_a_time() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, engine, _src, _tgt) = seeded_engine(test_config(&dir));

        let _guard = engine.try_begin().unwrap();
        assert!(matches!(
            engine.try_begin().unwrap_err(),
            SyncError::SyncInProgress
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn status_reflects_engine_state() {
        let dir = tempfile::tempdir().unwrap();
        let (store, engine, src, _tgt) = seeded_engine(test_config(&dir));
        store.seed_events(&src, vec![public_event("Bake Sale", 24)]);

        let before = engine.status();
        assert!(before.last_sync_time.is_none());
        assert!(!before.in_progress);

        engine.sync_calendars().await.unwrap();
        let after = engine.status();
        assert!(after.last_sync_time.is_some());
        assert_eq!(after.circuit_state, CircuitState::Closed);
        assert_eq!(after.cache.entries, 1);
        assert_eq!(engine.stats().runs, 1);
        assert_eq!(engine.history().len(), 1);
        assert_eq!(engine.history()[0].outcome, SyncOutcome::Success);
    }
}
