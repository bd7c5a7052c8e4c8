//! Background scheduler driving periodic sync runs.
//!
//! The scheduler is a thin trigger: it owns no sync state. Resilience
//! lives in the engine (breaker, rate limiter, single-run flag), so a
//! tick that lands while the engine is busy or degraded is simply
//! rejected and logged.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::SyncEngine;
use crate::error::SyncError;
use crate::history::SyncOutcome;

/// First retry delay after a failed run; doubles per consecutive
/// failure, capped at the regular interval.
const INITIAL_BACKOFF: Duration = Duration::from_secs(30);

/// Commands accepted by a running scheduler.
#[derive(Debug, Clone, Copy)]
pub enum SchedulerCommand {
    /// Trigger an immediate sync.
    SyncNow,
    /// Suspend periodic syncs; commands still work.
    Pause,
    /// Resume periodic syncs.
    Resume,
    /// Stop the scheduler loop.
    Stop,
}

/// Handle for sending commands to a running scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Sends a command; returns `false` if the scheduler has stopped.
    pub async fn send(&self, command: SchedulerCommand) -> bool {
        self.command_tx.send(command).await.is_ok()
    }
}

/// Periodic driver for a [`SyncEngine`].
pub struct Scheduler {
    engine: Arc<SyncEngine>,
    interval: Duration,
    command_tx: mpsc::Sender<SchedulerCommand>,
    command_rx: mpsc::Receiver<SchedulerCommand>,
}

impl Scheduler {
    /// Creates a scheduler ticking at the engine's configured interval.
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        let interval = engine.config().sync_interval;
        let (command_tx, command_rx) = mpsc::channel(16);
        Self {
            engine,
            interval,
            command_tx,
            command_rx,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            command_tx: self.command_tx.clone(),
        }
    }

    /// Runs the scheduler loop until [`SchedulerCommand::Stop`] or all
    /// handles are dropped. Runs one sync immediately on start.
    pub async fn run(mut self) {
        info!(
            interval_secs = self.interval.as_secs(),
            "scheduler started"
        );

        let mut paused = false;
        let mut consecutive_failures = u32::from(self.trigger().await);

        loop {
            let delay = self.next_delay(consecutive_failures);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    if paused {
                        debug!("scheduler paused; skipping tick");
                        continue;
                    }
                    if self.trigger().await {
                        consecutive_failures += 1;
                    } else {
                        consecutive_failures = 0;
                    }
                }
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(SchedulerCommand::SyncNow) => {
                            debug!("manual sync requested");
                            if self.trigger().await {
                                consecutive_failures += 1;
                            } else {
                                consecutive_failures = 0;
                            }
                        }
                        Some(SchedulerCommand::Pause) => {
                            info!("scheduler paused");
                            paused = true;
                        }
                        Some(SchedulerCommand::Resume) => {
                            info!("scheduler resumed");
                            paused = false;
                        }
                        Some(SchedulerCommand::Stop) | None => {
                            info!("scheduler stopping");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Retry delay after `failures` consecutive hard failures; the
    /// regular interval otherwise.
    fn next_delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return self.interval;
        }
        let backoff = INITIAL_BACKOFF.saturating_mul(2u32.saturating_pow(failures - 1));
        backoff.min(self.interval)
    }

    /// Runs one sync; returns `true` on a hard failure that should back
    /// off. Fail-fast rejections are expected and do not count.
    async fn trigger(&self) -> bool {
        match self.engine.sync_calendars().await {
            Ok(report) => {
                match report.outcome {
                    SyncOutcome::Skipped => debug!("sync skipped; no changes"),
                    outcome => info!(
                        ?outcome,
                        added = report.added,
                        updated = report.updated,
                        deleted = report.deleted,
                        failures = report.failures,
                        "scheduled sync finished"
                    ),
                }
                false
            }
            Err(err @ SyncError::SyncInProgress) | Err(err @ SyncError::CircuitOpen) => {
                debug!(%err, "sync not started");
                false
            }
            Err(SyncError::RateLimitExceeded {
                retry_after_secs, ..
            }) => {
                debug!(retry_after_secs, "sync rate limited");
                false
            }
            Err(err) => {
                warn!(%err, "scheduled sync failed");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use calsync_core::{Event, EventTime, ShowAs, PUBLIC_CATEGORY};
    use calsync_store::InMemoryStore;
    use chrono::{Duration as ChronoDuration, Utc};

    fn engine_with_source(dir: &tempfile::TempDir) -> (Arc<InMemoryStore>, Arc<SyncEngine>) {
        let store = Arc::new(InMemoryStore::new());
        let src = store.add_calendar("Calendar");
        store.add_calendar("Public Calendar");

        let start = Utc::now() + ChronoDuration::hours(24);
        store.seed_events(
            &src,
            vec![Event::new(
                "src-1",
                "Bake Sale",
                EventTime::from_utc(start),
                EventTime::from_utc(start + ChronoDuration::hours(1)),
            )
            .with_category(PUBLIC_CATEGORY)
            .with_show_as(ShowAs::Busy)],
        );

        let config = SyncConfig::new("Calendar", "Public Calendar")
            .with_cache_path(dir.path().join("cache.json"))
            .with_batching(10, Duration::from_millis(1));
        let engine = Arc::new(SyncEngine::new(store.clone(), config));
        (store, engine)
    }

    #[test]
    fn backoff_doubles_and_caps_at_the_interval() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, engine) = engine_with_source(&dir);
        let scheduler = Scheduler::new(engine);

        let interval = scheduler.interval;
        assert_eq!(scheduler.next_delay(0), interval);
        assert_eq!(scheduler.next_delay(1), Duration::from_secs(30));
        assert_eq!(scheduler.next_delay(2), Duration::from_secs(60));
        assert_eq!(scheduler.next_delay(20), interval);
    }

    #[tokio::test(start_paused = true)]
    async fn runs_an_initial_sync_and_stops_on_command() {
        let dir = tempfile::tempdir().unwrap();
        let (store, engine) = engine_with_source(&dir);

        let scheduler = Scheduler::new(engine);
        let handle = scheduler.handle();
        let task = tokio::spawn(scheduler.run());

        // Let the initial sync complete.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.counts().creates, 1);

        assert!(handle.send(SchedulerCommand::Stop).await);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn manual_sync_now_triggers_a_run() {
        let dir = tempfile::tempdir().unwrap();
        let (store, engine) = engine_with_source(&dir);
        let stats_engine = engine.clone();

        let scheduler = Scheduler::new(engine);
        let handle = scheduler.handle();
        let task = tokio::spawn(scheduler.run());
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Second trigger lands on the cache short-circuit.
        assert!(handle.send(SchedulerCommand::SyncNow).await);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(store.counts().creates, 1);
        assert_eq!(stats_engine.stats().runs, 2);
        assert_eq!(stats_engine.stats().skips, 1);

        handle.send(SchedulerCommand::Stop).await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn paused_scheduler_skips_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, engine) = engine_with_source(&dir);
        let stats_engine = engine.clone();
        let interval = engine.config().sync_interval;

        let scheduler = Scheduler::new(engine);
        let handle = scheduler.handle();
        let task = tokio::spawn(scheduler.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stats_engine.stats().runs, 1);

        handle.send(SchedulerCommand::Pause).await;
        tokio::time::sleep(interval * 3).await;
        assert_eq!(stats_engine.stats().runs, 1);

        handle.send(SchedulerCommand::Resume).await;
        tokio::time::sleep(interval + Duration::from_millis(50)).await;
        assert!(stats_engine.stats().runs >= 2);

        handle.send(SchedulerCommand::Stop).await;
        task.await.unwrap();
    }
}
