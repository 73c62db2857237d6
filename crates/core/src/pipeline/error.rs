//! Error types for the pipeline module.

use std::path::PathBuf;
use thiserror::Error;

use crate::archive::ArchiveError;
use crate::remote::RemoteError;
use crate::runner::RunnerError;

/// Failure of a single stage.
#[derive(Debug, Error)]
pub enum StageError {
    /// The stage input does not exist.
    #[error("Stage input not found: {path}")]
    MissingInput { path: PathBuf },

    /// The item runner could not start the batch.
    #[error(transparent)]
    Runner(#[from] RunnerError),

    /// Archive download, packing or unpacking failed.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// Remote provisioning, transfer or job control failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The remote job reached the error state.
    #[error("Remote job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },

    /// The remote job completed but reported nothing to download.
    #[error("Remote job {job_id} completed without an output URL")]
    MissingOutput { job_id: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other failure of a single-shot task.
    #[error("{0}")]
    Failed(String),
}

impl StageError {
    /// Creates a generic failure.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// Failure of a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage failed; later stages were not run.
    #[error("Stage '{stage}' failed: {source}")]
    StageFailed {
        stage: String,
        #[source]
        source: StageError,
    },

    /// A stage component could not be built from configuration.
    #[error("Failed to set up {component}: {reason}")]
    Setup { component: String, reason: String },
}

impl PipelineError {
    /// Creates a setup failure.
    pub fn setup(component: impl Into<String>, reason: impl ToString) -> Self {
        Self::Setup {
            component: component.into(),
            reason: reason.to_string(),
        }
    }

    /// Name of the stage that failed, if one ran.
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::StageFailed { stage, .. } => Some(stage),
            Self::Setup { .. } => None,
        }
    }
}
