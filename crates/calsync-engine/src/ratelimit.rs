//! Sliding-window rate limiter for sync invocations.
//!
//! Keeps the timestamps of recent syncs and rejects a new one when the
//! window is full, reporting how long until the oldest entry slides
//! out.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::error::SyncError;

#[derive(Debug)]
pub struct RateLimiter {
    max_per_window: usize,
    window: Duration,
    timestamps: VecDeque<Instant>,
}

impl RateLimiter {
    /// Limiter over a sliding hour.
    pub fn per_hour(max: usize) -> Self {
        Self::new(max, Duration::from_secs(3600))
    }

    pub fn new(max_per_window: usize, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            timestamps: VecDeque::new(),
        }
    }

    /// Records a sync attempt, or rejects it when the window is full.
    pub fn try_acquire(&mut self) -> Result<(), SyncError> {
        let now = Instant::now();
        while let Some(front) = self.timestamps.front() {
            if now.duration_since(*front) >= self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }

        if self.timestamps.len() >= self.max_per_window {
            let retry_after = self
                .timestamps
                .front()
                .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(self.window);
            return Err(SyncError::RateLimitExceeded {
                limit: self.max_per_window,
                retry_after_secs: retry_after.as_secs().max(1),
            });
        }

        self.timestamps.push_back(now);
        Ok(())
    }

    /// Syncs still available in the current window.
    pub fn remaining(&self) -> usize {
        self.max_per_window.saturating_sub(self.timestamps.len())
    }
}
