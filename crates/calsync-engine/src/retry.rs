//! Retry with exponential backoff for remote calls.
//!
//! Only transient store errors are retried; auth and validation
//! failures surface immediately. The delay doubles per attempt and is
//! capped, so a misconfigured retry count cannot stretch into minutes
//! per call.

use std::future::Future;
use std::time::Duration;

use calsync_store::StoreResult;
use tracing::warn;

use crate::config::SyncConfig;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.max_retries,
            config.retry_base_delay,
            config.retry_max_delay,
        )
    }

    /// Backoff before retry number `attempt` (zero-based): base * 2^attempt,
    /// capped at the maximum delay.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Runs `op` up to `1 + max_retries` times, sleeping between
    /// transient failures.
    pub async fn run<T, F, Fut>(&self, op_name: &str, mut op: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        op = op_name,
                        attempt = attempt + 1,
                        max = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        %err,
                        "transient failure; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
