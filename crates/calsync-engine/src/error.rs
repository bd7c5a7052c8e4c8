//! Engine error types.
//!
//! Callers need to distinguish "the service is degraded" (circuit open),
//! "slow down" (rate limit), "try later" (sync in progress), and "stop
//! everything" (safety abort) from ordinary remote failures, so each is
//! its own variant rather than a message.

use calsync_store::StoreError;
use thiserror::Error;

/// Errors from the sync engine.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A remote call failed after exhausting retries.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The sliding-hour sync budget is spent.
    #[error("rate limit exceeded: at most {limit} syncs per hour (retry in {retry_after_secs}s)")]
    RateLimitExceeded { limit: usize, retry_after_secs: u64 },

    /// The circuit breaker is open; no call was attempted.
    #[error("circuit breaker is open; service temporarily unavailable")]
    CircuitOpen,

    /// Another sync is running; the trigger is rejected, not queued.
    #[error("sync already in progress")]
    SyncInProgress,

    /// Source and target resolved to the same calendar. A sync here
    /// would delete the events it is supposed to mirror.
    #[error("safety abort: source and target resolve to the same calendar")]
    SafetyAbort,

    /// A configured calendar name did not resolve.
    #[error("calendar not found: {0}")]
    CalendarNotFound(String),

    /// The change cache could not be read or written.
    #[error("cache error: {0}")]
    Cache(String),
}

impl SyncError {
    /// Returns `true` for the fail-fast variants that carry no partial
    /// work and should not count against the circuit breaker.
    pub fn is_fail_fast(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded { .. } | Self::SyncInProgress | Self::CircuitOpen
        )
    }
}
