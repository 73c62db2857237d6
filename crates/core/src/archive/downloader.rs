//! Archive download from an archive.org-style file server.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::pipeline::{StageError, StageTask};
use crate::progress::{ProgressHandle, ProgressTracker};
use crate::runner::{ItemError, ItemOperation, ItemSource, WorkItem};

use super::config::{ArchiveConfig, DownloadType};
use super::error::ArchiveError;

/// Downloads scan archives by identifier.
///
/// Files are streamed to `<name>.part` and renamed once complete, so an
/// existing archive is always a whole one. Progress is reported per
/// identifier to the shared tracker.
pub struct ArchiveDownloader {
    config: ArchiveConfig,
    client: Client,
    progress: ProgressTracker,
}

impl ArchiveDownloader {
    /// Creates a downloader.
    pub fn new(config: ArchiveConfig, progress: ProgressTracker) -> Result<Self, ArchiveError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            config,
            client,
            progress,
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// URL of `filename` for `identifier`.
    pub fn url(&self, identifier: &str, filename: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            identifier,
            filename
        )
    }

    /// Paths the archive of `identifier` may have been saved under in `dir`,
    /// preferred flavor first.
    pub fn candidate_paths(&self, dir: &Path, identifier: &str) -> Vec<PathBuf> {
        let preferred = self.config.download_type;
        let mut paths = vec![dir.join(preferred.filename(identifier))];
        if preferred != DownloadType::ProcessedZip {
            paths.push(dir.join(DownloadType::ProcessedZip.filename(identifier)));
        }
        paths
    }

    /// Downloads the archive of `identifier` into `dest_dir`.
    ///
    /// Returns the existing file without a request when one of the
    /// candidate paths is already present. A 404 on the original tar falls
    /// back to the processed zip.
    pub async fn download(&self, identifier: &str, dest_dir: &Path) -> Result<PathBuf, ArchiveError> {
        let identifier = identifier.trim();

        if let Some(existing) = self
            .candidate_paths(dest_dir, identifier)
            .into_iter()
            .find(|p| p.exists())
        {
            info!("Archive {} already exists, skipping download", existing.display());
            return Ok(existing);
        }

        let mut filename = self.config.download_type.filename(identifier);
        let mut response = self.fetch(identifier, &filename).await?;

        if response.status() == StatusCode::NOT_FOUND
            && self.config.download_type != DownloadType::ProcessedZip
        {
            warn!(
                "{} not found, falling back to the processed archive",
                filename
            );
            filename = DownloadType::ProcessedZip.filename(identifier);
            response = self.fetch(identifier, &filename).await?;
        }

        if !response.status().is_success() {
            return Err(ArchiveError::Status {
                url: self.url(identifier, &filename),
                status: response.status().as_u16(),
            });
        }

        tokio::fs::create_dir_all(dest_dir).await?;
        let save_path = dest_dir.join(&filename);
        let part_path = dest_dir.join(format!("{filename}.part"));

        let meter = self
            .progress
            .start(identifier, response.content_length().unwrap_or(0));
        let written = stream_to_file(response, &part_path, &meter).await;
        meter.finish();

        match written {
            Ok(bytes) => {
                tokio::fs::rename(&part_path, &save_path).await?;
                info!("Downloaded {} ({} bytes)", save_path.display(), bytes);
                Ok(save_path)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part_path).await;
                Err(e)
            }
        }
    }

    async fn fetch(&self, identifier: &str, filename: &str) -> Result<Response, ArchiveError> {
        let url = self.url(identifier, filename);
        info!("Requesting {}", url);
        Ok(self.client.get(&url).send().await?)
    }
}

async fn stream_to_file(
    mut response: Response,
    path: &Path,
    meter: &ProgressHandle,
) -> Result<u64, ArchiveError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;

    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        meter.update(chunk.len() as u64);
    }

    file.flush().await?;
    Ok(written)
}

#[async_trait]
impl ItemOperation for ArchiveDownloader {
    fn name(&self) -> &str {
        "archive_download"
    }

    /// Downloads `Remote(identifier)` items into their destination directory.
    async fn run(&self, item: &WorkItem) -> Result<PathBuf, ItemError> {
        match &item.source {
            ItemSource::Remote(identifier) => Ok(self.download(identifier, &item.destination).await?),
            ItemSource::File(path) => Err(ItemError::permanent(format!(
                "archive download expects an identifier, got file {}",
                path.display()
            ))),
        }
    }
}

/// Stage task that downloads the book archive into the stage input directory.
pub struct DownloadTask {
    downloader: Arc<ArchiveDownloader>,
    identifier: String,
}

impl DownloadTask {
    pub fn new(downloader: Arc<ArchiveDownloader>, identifier: impl Into<String>) -> Self {
        Self {
            downloader,
            identifier: identifier.into(),
        }
    }
}

#[async_trait]
impl StageTask for DownloadTask {
    fn name(&self) -> &str {
        "download"
    }

    async fn run(&self, input: &Path, _output: &Path) -> Result<(), StageError> {
        self.downloader.download(&self.identifier, input).await?;
        Ok(())
    }
}
