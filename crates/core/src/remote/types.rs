//! Types for the remote module.

use serde::{Deserialize, Serialize};

/// How files reach the remote instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMethod {
    /// Secure copy to the instance's public SSH port.
    #[default]
    Scp,
    /// Relay through the provider CLI with a one-time code.
    Relay,
}

/// Status of a remote job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Error,
    /// Any status this client does not know; treated as still running.
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    /// Whether the job will not change state anymore.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// A job as reported by the job server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(default)]
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub error: Option<String>,
    /// Signed URL of the output archive.
    #[serde(default, alias = "download_url")]
    pub output_url: Option<String>,
}

/// Body of a job submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub input_filename: String,
    pub model_name: String,
    pub gcs_credentials_json: serde_json::Value,
    pub gcs_bucket_name: String,
}

/// Public SSH address of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshEndpoint {
    pub host: String,
    pub port: u16,
}
