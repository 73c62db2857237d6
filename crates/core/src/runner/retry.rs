//! Per-item retry with randomized exponential backoff.

use rand::Rng;
use std::path::PathBuf;
use tokio::time::{sleep, Duration};
use tracing::warn;

use super::config::RetryConfig;
use super::error::ItemError;
use super::types::{ItemOperation, WorkItem};

/// Final failure of an item after the retry loop gave up.
#[derive(Debug)]
pub struct AttemptFailure {
    pub error: ItemError,
    pub attempts: u32,
}

impl RetryConfig {
    /// Delay before retry number `retry` (1-based).
    ///
    /// The ceiling doubles with each retry, starting at `min_delay_ms` and
    /// never exceeding `max_delay_ms`; the actual delay is drawn uniformly
    /// between the minimum and that ceiling.
    pub fn backoff(&self, retry: u32) -> Duration {
        let min = self.min_delay_ms.min(self.max_delay_ms);
        let exponent = retry.saturating_sub(1).min(32);
        let ceiling = min
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms)
            .max(min);

        let millis = if ceiling > min {
            rand::rng().random_range(min..=ceiling)
        } else {
            min
        };
        Duration::from_millis(millis)
    }
}

/// Runs `operation` on `item`, retrying transient failures.
///
/// Returns the output path and the number of attempts used.
pub async fn run_with_retry(
    operation: &dyn ItemOperation,
    item: &WorkItem,
    policy: &RetryConfig,
) -> Result<(PathBuf, u32), AttemptFailure> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation.run(item).await {
            Ok(output) => return Ok((output, attempt)),
            Err(error) if error.is_retryable() && attempt < max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    "{} failed for {} (attempt {}/{}), retrying in {}ms: {}",
                    operation.name(),
                    item.id,
                    attempt,
                    max_attempts,
                    delay.as_millis(),
                    error
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                return Err(AttemptFailure {
                    error,
                    attempts: attempt,
                })
            }
        }
    }
}
