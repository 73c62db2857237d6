//! Types for the runner module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::ItemError;

/// Where a work item reads its input from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemSource {
    /// A local file.
    File(PathBuf),
    /// A remote identifier or URL.
    Remote(String),
}

/// One unit of work for the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Identifier used for logging and failure attribution.
    pub id: String,
    /// Input of the item.
    pub source: ItemSource,
    /// Where the output should be written.
    pub destination: PathBuf,
}

impl WorkItem {
    /// Creates an item for a local file. The id is the file name.
    pub fn file(path: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let id = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());

        Self {
            id,
            source: ItemSource::File(path),
            destination: destination.into(),
        }
    }

    /// Creates an item for a remote identifier.
    pub fn remote(identifier: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        let identifier = identifier.into();
        Self {
            id: identifier.clone(),
            source: ItemSource::Remote(identifier),
            destination: destination.into(),
        }
    }

    /// Returns the input path for file items.
    pub fn source_path(&self) -> Option<&Path> {
        match &self.source {
            ItemSource::File(path) => Some(path),
            ItemSource::Remote(_) => None,
        }
    }

    /// Returns the input path, or a permanent error for remote items.
    pub fn require_file(&self) -> Result<&Path, ItemError> {
        self.source_path().ok_or_else(|| {
            ItemError::permanent(format!("item {} has no local input file", self.id))
        })
    }
}

/// An operation applied to each item of a batch.
#[async_trait]
pub trait ItemOperation: Send + Sync {
    /// Returns the name of the operation.
    fn name(&self) -> &str;

    /// Processes one item and returns the path of what it produced.
    async fn run(&self, item: &WorkItem) -> Result<PathBuf, ItemError>;

    /// Called once with the batch output directory before any item runs.
    async fn prepare(&self, _output_dir: &Path) -> Result<(), ItemError> {
        Ok(())
    }
}

/// A failed item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemFailure {
    /// Item identifier.
    pub item_id: String,
    /// Error message of the last attempt.
    pub error: String,
    /// Number of attempts made.
    pub attempts: u32,
    /// Whether the last error was retryable (retries were exhausted).
    pub retryable: bool,
}

/// Result of running a batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    /// Number of items submitted.
    pub total: usize,
    /// Outputs of successful items, in completion order.
    pub outputs: Vec<PathBuf>,
    /// Failed items.
    pub failures: Vec<ItemFailure>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl BatchReport {
    /// Number of successful items.
    pub fn succeeded(&self) -> usize {
        self.outputs.len()
    }

    /// Number of failed items.
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Whether every item succeeded.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.outputs.len() == self.total
    }
}
