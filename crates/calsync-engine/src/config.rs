//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Display name of the source (private) calendar.
    pub source_calendar: String,
    /// Display name of the target (public) calendar.
    pub target_calendar: String,

    /// How far back the sync range reaches.
    pub sync_cutoff_days: i64,
    /// How far ahead the sync range reaches.
    pub sync_lookahead_days: i64,

    /// Whether to run the occurrence exception passes after the main sync.
    pub sync_occurrence_exceptions: bool,
    /// Lookahead of the occurrence exception window.
    pub occurrence_sync_days: i64,

    /// Maximum full sync invocations per sliding hour.
    pub max_syncs_per_hour: usize,

    /// Events per execution batch.
    pub batch_size: usize,
    /// Pause between batches.
    pub batch_pause: Duration,

    /// Retry attempts per remote call.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub retry_base_delay: Duration,
    /// Cap on the backoff delay.
    pub retry_max_delay: Duration,

    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Time the circuit stays open before probing again.
    pub recovery_timeout: Duration,
    /// Consecutive half-open successes before the circuit closes.
    pub success_threshold: u32,

    /// Where the change cache document is persisted.
    pub cache_path: PathBuf,
    /// Cache age beyond which a full reconciliation is forced.
    pub cache_ttl: Duration,

    /// Interval between scheduled syncs.
    pub sync_interval: Duration,

    /// Compute and report operations without executing them.
    pub dry_run: bool,
    /// Run the post-sync validator.
    pub validate_after_sync: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            source_calendar: "Calendar".to_string(),
            target_calendar: "Public Calendar".to_string(),
            sync_cutoff_days: 90,
            sync_lookahead_days: 180,
            sync_occurrence_exceptions: true,
            occurrence_sync_days: 60,
            max_syncs_per_hour: 20,
            batch_size: 20,
            batch_pause: Duration::from_millis(100),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(300),
            success_threshold: 3,
            cache_path: PathBuf::from("/data/event_cache.json"),
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            sync_interval: Duration::from_secs(23 * 60),
            dry_run: false,
            validate_after_sync: true,
        }
    }
}

impl SyncConfig {
    /// Creates a config for the given calendar pair.
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source_calendar: source.into(),
            target_calendar: target.into(),
            ..Default::default()
        }
    }

    /// Builder: set the cache path.
    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = path.into();
        self
    }

    /// Builder: enable dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Builder: set the hourly sync limit.
    pub fn with_max_syncs_per_hour(mut self, max: usize) -> Self {
        self.max_syncs_per_hour = max;
        self
    }

    /// Builder: set the batch size and inter-batch pause.
    pub fn with_batching(mut self, size: usize, pause: Duration) -> Self {
        self.batch_size = size;
        self.batch_pause = pause;
        self
    }

    /// Builder: set retry parameters.
    pub fn with_retries(mut self, max: u32, base: Duration, cap: Duration) -> Self {
        self.max_retries = max;
        self.retry_base_delay = base;
        self.retry_max_delay = cap;
        self
    }

    /// Builder: set circuit breaker thresholds.
    pub fn with_breaker(mut self, failures: u32, recovery: Duration, successes: u32) -> Self {
        self.failure_threshold = failures;
        self.recovery_timeout = recovery;
        self.success_threshold = successes;
        self
    }

    /// Builder: toggle post-sync validation.
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate_after_sync = validate;
        self
    }
}
