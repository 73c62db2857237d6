//! Mock job server client for testing.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::remote::{JobClient, JobRecord, JobRequest, JobStatus, RemoteError};

/// Mock implementation of the JobClient trait.
///
/// Status polls walk through a configured sequence; the last status
/// repeats once the sequence is exhausted. Downloads write a small file.
#[derive(Debug, Clone)]
pub struct MockJobClient {
    statuses: Arc<RwLock<Vec<JobStatus>>>,
    status_calls: Arc<RwLock<usize>>,
    requests: Arc<RwLock<Vec<JobRequest>>>,
    downloads: Arc<RwLock<Vec<(String, PathBuf)>>>,
    output_url: Arc<RwLock<Option<String>>>,
    error_message: Arc<RwLock<Option<String>>>,
    fail_create: Arc<RwLock<bool>>,
}

impl Default for MockJobClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockJobClient {
    /// Create a client whose jobs complete on the first poll.
    pub fn new() -> Self {
        Self {
            statuses: Arc::new(RwLock::new(vec![JobStatus::Completed])),
            status_calls: Arc::new(RwLock::new(0)),
            requests: Arc::new(RwLock::new(Vec::new())),
            downloads: Arc::new(RwLock::new(Vec::new())),
            output_url: Arc::new(RwLock::new(Some(
                "https://storage.example/output.zip".to_string(),
            ))),
            error_message: Arc::new(RwLock::new(None)),
            fail_create: Arc::new(RwLock::new(false)),
        }
    }

    /// Statuses returned by successive polls.
    pub async fn set_status_sequence(&self, statuses: Vec<JobStatus>) {
        *self.statuses.write().await = statuses;
    }

    /// Output URL reported with the job record.
    pub async fn set_output_url(&self, url: Option<String>) {
        *self.output_url.write().await = url;
    }

    /// Error message reported with the job record.
    pub async fn set_error_message(&self, message: impl Into<String>) {
        *self.error_message.write().await = Some(message.into());
    }

    /// Make job submission fail.
    pub async fn set_fail_create(&self, fail: bool) {
        *self.fail_create.write().await = fail;
    }

    /// Number of status polls made.
    pub async fn status_calls(&self) -> usize {
        *self.status_calls.read().await
    }

    /// Submitted job requests.
    pub async fn requests(&self) -> Vec<JobRequest> {
        self.requests.read().await.clone()
    }

    /// Recorded (url, destination) downloads.
    pub async fn downloads(&self) -> Vec<(String, PathBuf)> {
        self.downloads.read().await.clone()
    }
}

#[async_trait]
impl JobClient for MockJobClient {
    async fn create_job(&self, request: &JobRequest) -> Result<String, RemoteError> {
        if *self.fail_create.read().await {
            return Err(RemoteError::Api {
                status: 500,
                body: "job server unavailable".to_string(),
            });
        }
        let mut requests = self.requests.write().await;
        requests.push(request.clone());
        Ok(format!("job-{}", requests.len()))
    }

    async fn job_status(&self, job_id: &str) -> Result<JobRecord, RemoteError> {
        let mut calls = self.status_calls.write().await;
        let statuses = self.statuses.read().await;
        let status = statuses
            .get(*calls)
            .or_else(|| statuses.last())
            .copied()
            .unwrap_or(JobStatus::Completed);
        *calls += 1;

        Ok(JobRecord {
            job_id: job_id.to_string(),
            status,
            error: self.error_message.read().await.clone(),
            output_url: self.output_url.read().await.clone(),
        })
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64, RemoteError> {
        self.downloads
            .write()
            .await
            .push((url.to_string(), dest.to_path_buf()));

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = b"PK-upscaled";
        tokio::fs::write(dest, body).await?;
        Ok(body.len() as u64)
    }
}
