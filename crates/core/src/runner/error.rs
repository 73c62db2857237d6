//! Error types for the runner module.

use std::io::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single work item.
///
/// Item errors never escape the runner; they are recorded against the item
/// that produced them.
#[derive(Debug, Error)]
pub enum ItemError {
    /// Temporary failure, worth retrying (network blip, timeout).
    #[error("Transient failure: {0}")]
    Transient(String),

    /// The item can never succeed (corrupt or unsupported input).
    #[error("{0}")]
    Permanent(String),

    /// Input file is missing.
    #[error("Input not found: {path}")]
    InputNotFound { path: PathBuf },

    /// The external tool for this operation is not installed.
    #[error("Tool not found: {path}")]
    ToolNotFound { path: PathBuf },

    /// I/O error while processing the item.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The worker processing the item panicked.
    #[error("Worker panicked: {0}")]
    Panicked(String),
}

impl ItemError {
    /// Creates a permanent error.
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent(reason.into())
    }

    /// Creates a transient error.
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient(reason.into())
    }

    /// Whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                ErrorKind::TimedOut
                    | ErrorKind::Interrupted
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::WouldBlock
            ),
            Self::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| s.is_server_error() || s.as_u16() == 429)
            }
            _ => false,
        }
    }
}

/// Batch-level failure. Only setup problems end up here.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Output directory could not be created.
    #[error("Failed to create output directory {path}: {source}")]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The operation could not prepare the output directory.
    #[error("Failed to prepare {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: ItemError,
    },
}
