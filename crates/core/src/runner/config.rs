//! Configuration for the item runner.

use serde::{Deserialize, Serialize};

/// Configuration for the concurrent item runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Maximum number of items processed at the same time.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Whether to create the output directory before the first item runs.
    #[serde(default = "default_create_output_dir")]
    pub create_output_dir: bool,

    /// Per-item retry policy for transient failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Per-item retry configuration.
///
/// Delays grow exponentially from `min_delay_ms` and are randomized
/// between the minimum and the current ceiling, capped at `max_delay_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per item, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Minimum delay between attempts in milliseconds.
    #[serde(default = "default_min_delay")]
    pub min_delay_ms: u64,

    /// Maximum delay between attempts in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

fn default_max_workers() -> usize {
    8
}

fn default_create_output_dir() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    6
}

fn default_min_delay() -> u64 {
    1000 // 1 second
}

fn default_max_delay() -> u64 {
    60_000 // 1 minute
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            min_delay_ms: default_min_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

impl RetryConfig {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            min_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Sets the delay bounds.
    pub fn with_delays(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.min_delay_ms = min_ms;
        self.max_delay_ms = max_ms;
        self
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            create_output_dir: default_create_output_dir(),
            retry: RetryConfig::default(),
        }
    }
}

impl RunnerConfig {
    /// Sets the worker bound.
    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.max_workers = max;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}
