use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::archive::{ArchiveConfig, DownloadType};
use crate::remote::{RemoteConfig, TransferMethod};
use crate::runner::RunnerConfig;
use crate::transform::{ClassifierConfig, TransformsConfig};

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub book: BookConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub transforms: TransformsConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
}

/// The book being processed
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BookConfig {
    /// Archive identifier (e.g., "historyofengland01hume")
    pub identifier: String,
    /// Directory name under the projects path (default: the identifier)
    #[serde(default)]
    pub title: Option<String>,
}

impl BookConfig {
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.identifier)
    }
}

/// Working directory layout
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LayoutConfig {
    /// Directory holding downloaded archives and book directories
    #[serde(default = "default_projects_path")]
    pub projects_path: PathBuf,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            projects_path: default_projects_path(),
        }
    }
}

fn default_projects_path() -> PathBuf {
    PathBuf::from("projects")
}

/// Sanitized config for logging (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub book: BookConfig,
    pub layout: LayoutConfig,
    pub runner: RunnerConfig,
    pub archive: SanitizedArchiveConfig,
    pub transforms: TransformsConfig,
    pub classifier: ClassifierConfig,
    pub remote: SanitizedRemoteConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedArchiveConfig {
    pub base_url: String,
    pub download_type: DownloadType,
    pub max_workers: usize,
}

/// Sanitized remote config (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedRemoteConfig {
    pub enabled: bool,
    pub instance_id: String,
    pub port: u16,
    pub transfer: TransferMethod,
    pub url_template: String,
    pub api_key_configured: bool,
    pub model_name: String,
    pub bucket_name: String,
    pub credentials_configured: bool,
    pub ready_timeout_secs: u64,
    pub job_timeout_secs: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        let remote = &config.remote;
        Self {
            book: config.book.clone(),
            layout: config.layout.clone(),
            runner: config.runner.clone(),
            archive: SanitizedArchiveConfig {
                base_url: config.archive.base_url.clone(),
                download_type: config.archive.download_type,
                max_workers: config.archive.max_workers,
            },
            transforms: config.transforms.clone(),
            classifier: config.classifier.clone(),
            remote: SanitizedRemoteConfig {
                enabled: remote.enabled,
                instance_id: remote.instance_id.clone(),
                port: remote.port,
                transfer: remote.transfer,
                url_template: remote.url_template.clone(),
                api_key_configured: remote.api_key.as_ref().is_some_and(|k| !k.is_empty()),
                model_name: remote.job.model_name.clone(),
                bucket_name: remote.job.bucket_name.clone(),
                credentials_configured: remote.job.credentials_path.is_some(),
                ready_timeout_secs: remote.ready_timeout_secs,
                job_timeout_secs: remote.job_timeout_secs,
            },
        }
    }
}
