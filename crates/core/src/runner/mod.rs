//! Concurrent item runner.
//!
//! Applies one operation to a batch of independent items (pages, archive
//! identifiers) with a fixed number of workers. Per-item failures are
//! collected in a [`BatchReport`] instead of aborting the batch.

mod config;
mod error;
mod executor;
mod retry;
mod types;

pub use config::{RetryConfig, RunnerConfig};
pub use error::{ItemError, RunnerError};
pub use executor::ItemRunner;
pub use retry::{run_with_retry, AttemptFailure};
pub use types::{BatchReport, ItemFailure, ItemOperation, ItemSource, WorkItem};
