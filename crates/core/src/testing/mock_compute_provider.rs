//! Mock compute provider for testing.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::process::ToolError;
use crate::remote::{ComputeProvider, RemoteError, SshEndpoint};

/// Mock implementation of the ComputeProvider trait.
///
/// Records start and stop calls so tests can assert that every started
/// instance is stopped exactly once.
///
/// # Example
///
/// ```rust,ignore
/// use scanpress_core::testing::MockComputeProvider;
///
/// let provider = MockComputeProvider::new();
/// provider.set_healthy_after(3).await; // healthy on the 4th check
///
/// // ... run a remote stage ...
/// assert_eq!(provider.stop_calls().await, vec!["pod1"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockComputeProvider {
    start_calls: Arc<RwLock<Vec<String>>>,
    stop_calls: Arc<RwLock<Vec<String>>>,
    health_checks: Arc<RwLock<u32>>,
    healthy_after: Arc<RwLock<u32>>,
    fail_start: Arc<RwLock<bool>>,
    start_times_out: Arc<RwLock<bool>>,
    fail_stop: Arc<RwLock<bool>>,
    fail_ssh: Arc<RwLock<bool>>,
}

impl MockComputeProvider {
    /// Create a provider whose instances are healthy right away.
    pub fn new() -> Self {
        Self::default()
    }

    /// Report unhealthy for the first `checks` health checks.
    pub async fn set_healthy_after(&self, checks: u32) {
        *self.healthy_after.write().await = checks;
    }

    /// Fail starts as if the provider CLI were not installed.
    pub async fn set_fail_start(&self, fail: bool) {
        *self.fail_start.write().await = fail;
    }

    /// Record starts, then report that the start request timed out.
    pub async fn set_start_times_out(&self, times_out: bool) {
        *self.start_times_out.write().await = times_out;
    }

    pub async fn set_fail_stop(&self, fail: bool) {
        *self.fail_stop.write().await = fail;
    }

    pub async fn set_fail_ssh(&self, fail: bool) {
        *self.fail_ssh.write().await = fail;
    }

    /// Instances started, in call order.
    pub async fn start_calls(&self) -> Vec<String> {
        self.start_calls.read().await.clone()
    }

    /// Instances stopped, in call order.
    pub async fn stop_calls(&self) -> Vec<String> {
        self.stop_calls.read().await.clone()
    }

    /// Number of health checks made.
    pub async fn health_checks(&self) -> u32 {
        *self.health_checks.read().await
    }
}

#[async_trait]
impl ComputeProvider for MockComputeProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn start_instance(&self, instance_id: &str) -> Result<(), RemoteError> {
        if *self.fail_start.read().await {
            return Err(ToolError::NotFound {
                path: PathBuf::from("runpodctl"),
            }
            .into());
        }
        self.start_calls.write().await.push(instance_id.to_string());
        if *self.start_times_out.read().await {
            return Err(ToolError::Timeout {
                program: "runpodctl".to_string(),
                timeout_secs: 60,
            }
            .into());
        }
        Ok(())
    }

    async fn health(&self, _server_url: &str) -> bool {
        let mut checks = self.health_checks.write().await;
        let before = *checks;
        *checks = checks.saturating_add(1);
        before >= *self.healthy_after.read().await
    }

    async fn ssh_endpoint(&self, instance_id: &str) -> Result<SshEndpoint, RemoteError> {
        if *self.fail_ssh.read().await {
            return Err(RemoteError::SshEndpoint(format!(
                "no public ssh port for {instance_id}"
            )));
        }
        Ok(SshEndpoint {
            host: "127.0.0.1".to_string(),
            port: 2222,
        })
    }

    async fn stop_instance(&self, instance_id: &str) -> Result<(), RemoteError> {
        self.stop_calls.write().await.push(instance_id.to_string());
        if *self.fail_stop.read().await {
            return Err(RemoteError::Config(format!("cannot stop {instance_id}")));
        }
        Ok(())
    }
}
