//! Error types for the remote module.

use thiserror::Error;

use crate::process::ToolError;

/// Errors from provisioning, transfer and job control.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The instance never answered its health check.
    #[error("Instance {instance_id} not ready after {waited_secs} seconds")]
    NotReady { instance_id: String, waited_secs: u64 },

    /// The job did not reach a terminal state in time.
    #[error("Job {job_id} still running after {waited_secs} seconds")]
    JobTimeout { job_id: String, waited_secs: u64 },

    /// The relay helper did not emit a credential in time.
    #[error("No transfer credential after {attempts} attempts")]
    CredentialTimeout { attempts: u32 },

    /// Upload failed.
    #[error("Transfer failed: {0}")]
    Transfer(String),

    /// No SSH endpoint for the instance.
    #[error("SSH endpoint unavailable: {0}")]
    SshEndpoint(String),

    /// API answered with an error status.
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    /// Provider GraphQL returned errors.
    #[error("GraphQL error: {0}")]
    GraphQl(String),

    /// Response could not be understood.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider CLI or scp failed.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    /// Whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            Self::Tool(e) => e.is_retryable(),
            _ => false,
        }
    }
}
