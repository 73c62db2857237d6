//! Configuration for remote GPU offload.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::RemoteError;
use super::types::{JobRequest, TransferMethod};

/// Configuration for leasing a remote instance and running jobs on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Whether the remote upscale stage is part of the pipeline.
    #[serde(default)]
    pub enabled: bool,

    /// Instance to start and stop.
    #[serde(default)]
    pub instance_id: String,

    /// Port of the job server on the instance.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Reachability URL, with `{instance_id}` and `{port}` placeholders.
    #[serde(default = "default_url_template")]
    pub url_template: String,

    /// How packages reach the instance.
    #[serde(default)]
    pub transfer: TransferMethod,

    /// SSH user for secure copy.
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,

    /// Private key for secure copy. A leading `~` expands to `$HOME`.
    #[serde(default = "default_ssh_key_path")]
    pub ssh_key_path: PathBuf,

    /// Remote directory uploads are copied into.
    #[serde(default = "default_remote_dir")]
    pub remote_dir: String,

    /// Path to the scp binary.
    #[serde(default = "default_scp_path")]
    pub scp_path: PathBuf,

    /// Path to the provider CLI.
    #[serde(default = "default_runpodctl_path")]
    pub runpodctl_path: PathBuf,

    /// Provider GraphQL endpoint.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Provider API key, needed for the SSH endpoint lookup.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Seconds between health probes.
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,

    /// Seconds to wait for the instance to become healthy.
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,

    /// Seconds between job status polls.
    #[serde(default = "default_job_poll_interval")]
    pub job_poll_interval_secs: u64,

    /// Seconds a job may take before it is abandoned.
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,

    /// Attempts at reading the relay credential.
    #[serde(default = "default_credential_poll_attempts")]
    pub credential_poll_attempts: u32,

    /// Milliseconds between relay credential attempts.
    #[serde(default = "default_credential_poll_interval")]
    pub credential_poll_interval_ms: u64,

    /// Timeout for API requests in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Timeout for provider CLI commands in seconds.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Timeout for uploads and output downloads in seconds.
    #[serde(default = "default_transfer_timeout")]
    pub transfer_timeout_secs: u64,

    /// Parameters of the upscale job.
    #[serde(default)]
    pub job: UpscaleJobConfig,
}

/// Parameters sent with every upscale job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpscaleJobConfig {
    /// Model the job server loads.
    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// Bucket the job server writes its output to.
    #[serde(default)]
    pub bucket_name: String,

    /// Service account JSON forwarded to the job server.
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
}

fn default_port() -> u16 {
    5000
}

fn default_url_template() -> String {
    "https://{instance_id}-{port}.proxy.runpod.net/".to_string()
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_ssh_key_path() -> PathBuf {
    PathBuf::from("~/.ssh/id_ed25519")
}

fn default_remote_dir() -> String {
    "/workspace".to_string()
}

fn default_scp_path() -> PathBuf {
    PathBuf::from("scp")
}

fn default_runpodctl_path() -> PathBuf {
    PathBuf::from("runpodctl")
}

fn default_api_url() -> String {
    "https://api.runpod.io/graphql".to_string()
}

fn default_health_interval() -> u64 {
    5
}

fn default_ready_timeout() -> u64 {
    900 // 15 minutes
}

fn default_job_poll_interval() -> u64 {
    10
}

fn default_job_timeout() -> u64 {
    7200 // 2 hours
}

fn default_credential_poll_attempts() -> u32 {
    10
}

fn default_credential_poll_interval() -> u64 {
    500
}

fn default_request_timeout() -> u64 {
    30
}

fn default_command_timeout() -> u64 {
    120
}

fn default_transfer_timeout() -> u64 {
    3600
}

fn default_model_name() -> String {
    "net_g_1000000".to_string()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            instance_id: String::new(),
            port: default_port(),
            url_template: default_url_template(),
            transfer: TransferMethod::default(),
            ssh_user: default_ssh_user(),
            ssh_key_path: default_ssh_key_path(),
            remote_dir: default_remote_dir(),
            scp_path: default_scp_path(),
            runpodctl_path: default_runpodctl_path(),
            api_url: default_api_url(),
            api_key: None,
            health_interval_secs: default_health_interval(),
            ready_timeout_secs: default_ready_timeout(),
            job_poll_interval_secs: default_job_poll_interval(),
            job_timeout_secs: default_job_timeout(),
            credential_poll_attempts: default_credential_poll_attempts(),
            credential_poll_interval_ms: default_credential_poll_interval(),
            request_timeout_secs: default_request_timeout(),
            command_timeout_secs: default_command_timeout(),
            transfer_timeout_secs: default_transfer_timeout(),
            job: UpscaleJobConfig::default(),
        }
    }
}

impl Default for UpscaleJobConfig {
    fn default() -> Self {
        Self {
            model_name: default_model_name(),
            bucket_name: String::new(),
            credentials_path: None,
        }
    }
}

impl RemoteConfig {
    /// Reachability URL of `instance_id` on `port`.
    pub fn server_url(&self, instance_id: &str, port: u16) -> String {
        let url = self
            .url_template
            .replace("{instance_id}", instance_id)
            .replace("{port}", &port.to_string());
        if url.ends_with('/') {
            url
        } else {
            format!("{url}/")
        }
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn job_poll_interval(&self) -> Duration {
        Duration::from_secs(self.job_poll_interval_secs)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn credential_poll_interval(&self) -> Duration {
        Duration::from_millis(self.credential_poll_interval_ms)
    }

    /// Shortens every wait, for tests against local fakes.
    pub fn with_intervals(mut self, health_secs: u64, job_poll_secs: u64) -> Self {
        self.health_interval_secs = health_secs;
        self.job_poll_interval_secs = job_poll_secs;
        self
    }

    /// Sets the readiness and job deadlines.
    pub fn with_deadlines(mut self, ready_secs: u64, job_secs: u64) -> Self {
        self.ready_timeout_secs = ready_secs;
        self.job_timeout_secs = job_secs;
        self
    }
}

impl UpscaleJobConfig {
    /// Builds the job request for an uploaded package.
    ///
    /// The credentials file, when configured, is read and embedded as JSON.
    pub async fn build_request(&self, input_filename: &str) -> Result<JobRequest, RemoteError> {
        let credentials = match &self.credentials_path {
            Some(path) => {
                let raw = tokio::fs::read_to_string(expand_home(path)).await?;
                serde_json::from_str(&raw).map_err(|e| {
                    RemoteError::Config(format!(
                        "invalid credentials file {}: {}",
                        path.display(),
                        e
                    ))
                })?
            }
            None => serde_json::Value::Null,
        };

        Ok(JobRequest {
            input_filename: input_filename.to_string(),
            model_name: self.model_name.clone(),
            gcs_credentials_json: credentials,
            gcs_bucket_name: self.bucket_name.clone(),
        })
    }
}

/// Expands a leading `~` to the `HOME` directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}
