//! Circuit breaker for the remote calendar service.
//!
//! Consecutive remote failures open the circuit; while open, sync
//! attempts are rejected immediately instead of hammering a degraded
//! service. After the recovery timeout the breaker admits probe traffic
//! (half-open) and closes again only after a run of consecutive
//! successes.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::error::SyncError;

/// Breaker state. Open rejects, half-open probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    success_threshold: u32,

    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration, success_threshold: u32) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            success_threshold,
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.failure_threshold,
            config.recovery_timeout,
            config.success_threshold,
        )
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Gate for a new attempt. Moves an expired open circuit to
    /// half-open; rejects with [`SyncError::CircuitOpen`] otherwise.
    pub fn try_acquire(&mut self) -> Result<(), SyncError> {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let expired = self
                    .opened_at
                    .map(|at| at.elapsed() >= self.recovery_timeout)
                    .unwrap_or(true);
                if expired {
                    info!("circuit recovery timeout elapsed; admitting probe traffic");
                    self.state = CircuitState::HalfOpen;
                    self.success_count = 0;
                    Ok(())
                } else {
                    Err(SyncError::CircuitOpen)
                }
            }
        }
    }

    /// Records a successful attempt. In half-open, enough consecutive
    /// successes close the circuit.
    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::Closed => {
                self.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= self.success_threshold {
                    info!("circuit closed after {} probe successes", self.success_count);
                    self.state = CircuitState::Closed;
                    self.failure_count = 0;
                    self.success_count = 0;
                    self.opened_at = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Records a failed attempt. Any half-open failure reopens
    /// immediately; in closed state the threshold applies.
    pub fn record_failure(&mut self) {
        match self.state {
            CircuitState::HalfOpen => {
                warn!("probe failed; circuit reopened");
                self.open();
            }
            CircuitState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= self.failure_threshold {
                    warn!(
                        failures = self.failure_count,
                        "failure threshold reached; circuit opened"
                    );
                    self.open();
                }
            }
            CircuitState::Open => {
                self.opened_at = Some(Instant::now());
            }
        }
    }

    /// Manual reset to closed, clearing all counters.
    pub fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.success_count = 0;
        self.opened_at = None;
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.success_count = 0;
        self.opened_at = Some(Instant::now());
    }
}
