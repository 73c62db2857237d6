//! File transfer strategies.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::process::{run_tool, ToolError};

use super::config::{expand_home, RemoteConfig};
use super::error::RemoteError;
use super::traits::FileTransfer;
use super::types::SshEndpoint;

static RELAY_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Code is:\s*(\S+)").expect("relay code pattern is valid"));

/// Uploads with `scp` to the instance's public SSH port.
pub struct ScpTransfer {
    scp_path: PathBuf,
    endpoint: SshEndpoint,
    user: String,
    key_path: PathBuf,
    remote_dir: String,
    timeout_secs: u64,
}

impl ScpTransfer {
    pub fn new(config: &RemoteConfig, endpoint: SshEndpoint) -> Self {
        Self {
            scp_path: config.scp_path.clone(),
            endpoint,
            user: config.ssh_user.clone(),
            key_path: expand_home(&config.ssh_key_path),
            remote_dir: config.remote_dir.trim_end_matches('/').to_string(),
            timeout_secs: config.transfer_timeout_secs,
        }
    }

    /// Remote path `local_path` is copied to.
    pub fn remote_path(&self, local_path: &Path) -> Result<String, RemoteError> {
        let name = local_path
            .file_name()
            .ok_or_else(|| RemoteError::Transfer(format!("{} has no file name", local_path.display())))?;
        Ok(format!("{}/{}", self.remote_dir, name.to_string_lossy()))
    }

    /// Arguments of the scp invocation.
    pub fn args(&self, local_path: &Path, remote_path: &str) -> Vec<String> {
        vec![
            "-P".to_string(),
            self.endpoint.port.to_string(),
            "-i".to_string(),
            self.key_path.to_string_lossy().to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            local_path.to_string_lossy().to_string(),
            format!("{}@{}:{}", self.user, self.endpoint.host, remote_path),
        ]
    }
}

#[async_trait]
impl FileTransfer for ScpTransfer {
    fn name(&self) -> &str {
        "scp"
    }

    async fn upload(&self, local_path: &Path) -> Result<String, RemoteError> {
        let remote_path = self.remote_path(local_path)?;
        info!(
            "Uploading {} to {}:{}",
            local_path.display(),
            self.endpoint.host,
            remote_path
        );

        run_tool(&self.scp_path, &self.args(local_path, &remote_path), self.timeout_secs).await?;
        info!("Uploaded to {}", remote_path);
        Ok(remote_path)
    }
}

/// Uploads through the provider relay.
///
/// `runpodctl send <file>` prints a one-time code and then serves the file
/// until the receiver pulls it, so the helper is kept running until
/// [`FileTransfer::close`].
pub struct RelayTransfer {
    runpodctl_path: PathBuf,
    attempts: u32,
    interval: Duration,
    helpers: Mutex<Vec<Child>>,
}

impl RelayTransfer {
    pub fn new(config: &RemoteConfig) -> Self {
        Self::with_polling(
            config.runpodctl_path.clone(),
            config.credential_poll_attempts,
            config.credential_poll_interval(),
        )
    }

    /// Creates a relay with an explicit helper binary and credential polling.
    pub fn with_polling(runpodctl_path: PathBuf, attempts: u32, interval: Duration) -> Self {
        Self {
            runpodctl_path,
            attempts,
            interval,
            helpers: Mutex::new(Vec::new()),
        }
    }

    /// Number of helper processes still held.
    pub async fn helper_count(&self) -> usize {
        self.helpers.lock().await.len()
    }
}

/// Scans `reader` line by line and sends the first relay code on `tx`.
///
/// Keeps reading until end of stream so the helper never blocks on a full
/// pipe.
pub async fn read_relay_code<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut sent = false;

    while let Ok(Some(line)) = lines.next_line().await {
        if sent {
            continue;
        }
        if let Some(code) = RELAY_CODE.captures(&line).and_then(|c| c.get(1)) {
            sent = true;
            let _ = tx.send(code.as_str().to_string()).await;
        }
    }
}

/// Waits for a credential on `rx`, trying `attempts` times `interval` apart.
pub async fn await_credential(
    rx: &mut mpsc::Receiver<String>,
    attempts: u32,
    interval: Duration,
) -> Result<String, RemoteError> {
    for attempt in 1..=attempts {
        match timeout(interval, rx.recv()).await {
            Ok(Some(code)) => return Ok(code),
            Ok(None) => {
                return Err(RemoteError::Transfer(
                    "relay helper exited without a receive code".to_string(),
                ))
            }
            Err(_) => debug!("No relay code yet (attempt {}/{})", attempt, attempts),
        }
    }
    Err(RemoteError::CredentialTimeout { attempts })
}

#[async_trait]
impl FileTransfer for RelayTransfer {
    fn name(&self) -> &str {
        "relay"
    }

    async fn upload(&self, local_path: &Path) -> Result<String, RemoteError> {
        info!("Sending {} through the relay", local_path.display());

        let mut child = Command::new(&self.runpodctl_path)
            .arg("send")
            .arg(local_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    RemoteError::Tool(ToolError::NotFound {
                        path: self.runpodctl_path.clone(),
                    })
                } else {
                    RemoteError::Io(e)
                }
            })?;

        let stdout = child.stdout.take();
        self.helpers.lock().await.push(child);
        let stdout =
            stdout.ok_or_else(|| RemoteError::Transfer("relay helper has no stdout".to_string()))?;

        let (tx, mut rx) = mpsc::channel(1);
        tokio::spawn(read_relay_code(stdout, tx));

        let code = await_credential(&mut rx, self.attempts, self.interval).await?;
        info!("Relay receive code: {}", code);
        Ok(code)
    }

    async fn close(&self) -> Result<(), RemoteError> {
        let mut helpers = self.helpers.lock().await;
        for mut child in helpers.drain(..) {
            match child.try_wait() {
                Ok(Some(status)) => debug!("Relay helper already exited: {}", status),
                _ => {
                    if let Err(e) = child.kill().await {
                        warn!("Failed to stop relay helper: {}", e);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scp() -> ScpTransfer {
        let config = RemoteConfig {
            ssh_key_path: PathBuf::from("/keys/id"),
            ..Default::default()
        };
        ScpTransfer::new(
            &config,
            SshEndpoint {
                host: "203.0.113.9".to_string(),
                port: 40122,
            },
        )
    }

    #[test]
    fn test_scp_args() {
        let transfer = scp();
        let remote = transfer.remote_path(Path::new("/tmp/book.zip")).unwrap();
        assert_eq!(remote, "/workspace/book.zip");

        let args = transfer.args(Path::new("/tmp/book.zip"), &remote);
        assert_eq!(&args[..4], &["-P", "40122", "-i", "/keys/id"]);
        assert_eq!(args.last().unwrap(), "root@203.0.113.9:/workspace/book.zip");
    }

    #[tokio::test]
    async fn test_reads_code_from_output() {
        let output: &[u8] = b"Sending 'book.zip' (12.0 MB)\nCode is: 8338-galileo-collect-fidel\nOn the other computer run\n";
        let (tx, mut rx) = mpsc::channel(1);
        read_relay_code(output, tx).await;

        assert_eq!(rx.recv().await.unwrap(), "8338-galileo-collect-fidel");
    }

    #[tokio::test]
    async fn test_credential_times_out() {
        let (_tx, mut rx) = mpsc::channel::<String>(1);
        let err = await_credential(&mut rx, 3, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::CredentialTimeout { attempts: 3 }));
    }

    #[tokio::test]
    async fn test_closed_channel_is_transfer_error() {
        let (tx, mut rx) = mpsc::channel::<String>(1);
        drop(tx);
        let err = await_credential(&mut rx, 3, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Transfer(_)));
    }

    #[tokio::test]
    async fn test_missing_helper_binary() {
        let relay = RelayTransfer::with_polling(
            PathBuf::from("/nonexistent/runpodctl"),
            2,
            Duration::from_millis(10),
        );
        let err = relay.upload(Path::new("/tmp/book.zip")).await.unwrap_err();
        assert!(matches!(err, RemoteError::Tool(ToolError::NotFound { .. })));
        assert_eq!(relay.helper_count().await, 0);
    }
}
