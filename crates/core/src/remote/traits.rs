//! Trait definitions for the remote module.

use async_trait::async_trait;
use std::path::Path;

use super::error::RemoteError;
use super::types::{JobRecord, JobRequest, SshEndpoint};

/// A provider of rentable compute instances.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Returns the name of this provider.
    fn name(&self) -> &str;

    /// Starts or resumes an instance. Does not wait for it to be ready.
    async fn start_instance(&self, instance_id: &str) -> Result<(), RemoteError>;

    /// Whether the server at `server_url` answers its health endpoint.
    /// Connection failures count as "not ready".
    async fn health(&self, server_url: &str) -> bool;

    /// Public SSH address of an instance.
    async fn ssh_endpoint(&self, instance_id: &str) -> Result<SshEndpoint, RemoteError>;

    /// Stops an instance.
    async fn stop_instance(&self, instance_id: &str) -> Result<(), RemoteError>;
}

/// Client of the job server running on an instance.
#[async_trait]
pub trait JobClient: Send + Sync {
    /// Submits a job and returns its id.
    async fn create_job(&self, request: &JobRequest) -> Result<String, RemoteError>;

    /// Current state of a job.
    async fn job_status(&self, job_id: &str) -> Result<JobRecord, RemoteError>;

    /// Downloads `url` to `dest`, returning the number of bytes written.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, RemoteError>;
}

/// Strategy for getting a local file onto the instance.
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Returns the name of this strategy.
    fn name(&self) -> &str;

    /// Uploads `local_path` and returns how the instance refers to it
    /// (a remote path or a one-time receive code).
    async fn upload(&self, local_path: &Path) -> Result<String, RemoteError>;

    /// Releases helper processes.
    async fn close(&self) -> Result<(), RemoteError> {
        Ok(())
    }
}
