//! HTTP client for the upscale job server.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::progress::ProgressTracker;

use super::error::RemoteError;
use super::traits::JobClient;
use super::types::{JobRecord, JobRequest};

/// Client of the job server on a leased instance.
///
/// Endpoints: `POST /jobs`, `GET /jobs/{id}/status`. Outputs are downloaded
/// from the URL the server reports.
pub struct UpscaleServerClient {
    base_url: String,
    client: Client,
    download_client: Client,
    progress: Option<ProgressTracker>,
}

#[derive(Debug, Deserialize)]
struct CreateJobResponse {
    job_id: String,
}

impl UpscaleServerClient {
    /// Creates a client for the server at `base_url`.
    pub fn new(
        base_url: &str,
        request_timeout_secs: u64,
        download_timeout_secs: u64,
    ) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(request_timeout_secs))
            .build()?;
        let download_client = Client::builder()
            .timeout(Duration::from_secs(download_timeout_secs))
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            download_client,
            progress: None,
        })
    }

    /// Reports download progress to `tracker`.
    pub fn with_progress(mut self, tracker: ProgressTracker) -> Self {
        self.progress = Some(tracker);
        self
    }

    /// Base URL without trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

async fn check_status(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::Api {
        status: status.as_u16(),
        body: body.chars().take(200).collect(),
    })
}

#[async_trait]
impl JobClient for UpscaleServerClient {
    async fn create_job(&self, request: &JobRequest) -> Result<String, RemoteError> {
        let url = format!("{}/jobs", self.base_url);
        let response = self.client.post(&url).json(request).send().await?;
        let body: CreateJobResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;

        info!("Submitted job {} for {}", body.job_id, request.input_filename);
        Ok(body.job_id)
    }

    async fn job_status(&self, job_id: &str) -> Result<JobRecord, RemoteError> {
        let url = format!("{}/jobs/{}/status", self.base_url, job_id);
        let response = self.client.get(&url).send().await?;
        let mut record: JobRecord = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;

        if record.job_id.is_empty() {
            record.job_id = job_id.to_string();
        }
        debug!("Job {} is {:?}", job_id, record.status);
        Ok(record)
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64, RemoteError> {
        let mut response = check_status(self.download_client.get(url).send().await?).await?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = dest.with_extension("part");
        let key = dest.to_string_lossy().to_string();
        let meter = self
            .progress
            .as_ref()
            .map(|p| p.start(key.clone(), response.content_length().unwrap_or(0)));

        let mut file = tokio::fs::File::create(&partial).await?;
        let mut written = 0u64;
        let streamed: Result<(), RemoteError> = async {
            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
                if let Some(ref meter) = meter {
                    meter.update(chunk.len() as u64);
                }
            }
            file.flush().await?;
            Ok(())
        }
        .await;

        if let Some(meter) = meter {
            meter.finish();
        }
        if let Err(e) = streamed {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }

        tokio::fs::rename(&partial, dest).await?;
        info!("Downloaded {} bytes to {}", written, dest.display());
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trimmed() {
        let client = UpscaleServerClient::new("https://p-5000.proxy.runpod.net/", 5, 5).unwrap();
        assert_eq!(client.base_url(), "https://p-5000.proxy.runpod.net");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_retryable() {
        let client = UpscaleServerClient::new("http://127.0.0.1:9", 2, 2).unwrap();
        let err = client.job_status("j1").await.unwrap_err();
        assert!(matches!(err, RemoteError::Http(_)));
        assert!(err.is_retryable());
    }
}
