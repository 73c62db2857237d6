//! Error types for the archive module.

use std::io::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;

use crate::runner::ItemError;

/// Errors from downloading, packing or unpacking archives.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with an error status.
    #[error("Download of {url} failed with status {status}")]
    Status { url: String, status: u16 },

    /// No archive to extract.
    #[error("No archive found, tried: {tried:?}")]
    NotFound { tried: Vec<PathBuf> },

    /// The file extension does not match a known archive format.
    #[error("Unsupported archive format: {path}")]
    UnsupportedFormat { path: PathBuf },

    /// The zip file is malformed or could not be written.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// The blocking pack or unpack task did not complete.
    #[error("Archive task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    /// Whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Io(e) => matches!(
                e.kind(),
                ErrorKind::TimedOut | ErrorKind::Interrupted | ErrorKind::ConnectionReset
            ),
            _ => false,
        }
    }
}

impl From<ArchiveError> for ItemError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::Http(e) => ItemError::Http(e),
            ArchiveError::Io(e) => ItemError::Io(e),
            e if e.is_retryable() => ItemError::transient(e.to_string()),
            e => ItemError::permanent(e.to_string()),
        }
    }
}
