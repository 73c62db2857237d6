//! Configuration for archive download and packaging.

use serde::{Deserialize, Serialize};

/// Which archive flavor to fetch for an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadType {
    /// `{id}_jp2.zip`, the processed JPEG 2000 images.
    #[default]
    ProcessedZip,
    /// `{id}_orig_jp2.tar`, the original scans.
    OriginalTar,
}

impl DownloadType {
    /// File name of this archive flavor for `identifier`.
    pub fn filename(&self, identifier: &str) -> String {
        match self {
            Self::ProcessedZip => format!("{identifier}_jp2.zip"),
            Self::OriginalTar => format!("{identifier}_orig_jp2.tar"),
        }
    }
}

/// Configuration for the archive downloader and extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Base URL; files live at `{base_url}/{identifier}/{filename}`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Archive flavor to request first.
    #[serde(default)]
    pub download_type: DownloadType,

    /// HTTP request timeout in seconds (whole transfer).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Parallel downloads for batch downloads.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Remove the archive once it has been extracted.
    #[serde(default = "default_remove_after_extract")]
    pub remove_after_extract: bool,
}

fn default_base_url() -> String {
    "https://archive.org/download".to_string()
}

fn default_request_timeout() -> u64 {
    3600
}

fn default_max_workers() -> usize {
    5
}

fn default_remove_after_extract() -> bool {
    true
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            download_type: DownloadType::default(),
            request_timeout_secs: default_request_timeout(),
            max_workers: default_max_workers(),
            remove_after_extract: default_remove_after_extract(),
        }
    }
}

impl ArchiveConfig {
    /// Sets the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets the archive flavor.
    pub fn with_download_type(mut self, download_type: DownloadType) -> Self {
        self.download_type = download_type;
        self
    }
}
