//! Provisioning of remote sessions.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::process::ToolError;
use crate::progress::ProgressTracker;

use super::config::RemoteConfig;
use super::error::RemoteError;
use super::job_client::UpscaleServerClient;
use super::runpod::RunPodProvider;
use super::session::RemoteSession;
use super::traits::{ComputeProvider, FileTransfer, JobClient};
use super::transfer::{RelayTransfer, ScpTransfer};
use super::types::TransferMethod;

/// Builds the job client for a server URL.
pub type JobClientConnector =
    Arc<dyn Fn(&str) -> Result<Arc<dyn JobClient>, RemoteError> + Send + Sync>;

/// Starts instances, waits for them and assembles [`RemoteSession`]s.
pub struct RemoteSessionFactory {
    config: RemoteConfig,
    provider: Arc<dyn ComputeProvider>,
    connector: JobClientConnector,
    transfer_override: Option<Arc<dyn FileTransfer>>,
}

fn server_connector(config: &RemoteConfig, progress: Option<ProgressTracker>) -> JobClientConnector {
    let request_timeout = config.request_timeout_secs;
    let download_timeout = config.transfer_timeout_secs;

    Arc::new(move |url: &str| {
        let mut client = UpscaleServerClient::new(url, request_timeout, download_timeout)?;
        if let Some(ref tracker) = progress {
            client = client.with_progress(tracker.clone());
        }
        Ok(Arc::new(client) as Arc<dyn JobClient>)
    })
}

impl RemoteSessionFactory {
    /// Creates a factory over `provider`, talking to the job server over HTTP.
    pub fn new(config: RemoteConfig, provider: Arc<dyn ComputeProvider>) -> Self {
        let connector = server_connector(&config, None);
        Self {
            config,
            provider,
            connector,
            transfer_override: None,
        }
    }

    /// Creates a factory backed by RunPod.
    pub fn runpod(config: RemoteConfig, progress: ProgressTracker) -> Result<Self, RemoteError> {
        let provider = Arc::new(RunPodProvider::new(config.clone())?);
        Ok(Self::new(config, provider).with_progress(progress))
    }

    /// Reports output download progress to `tracker`.
    pub fn with_progress(mut self, tracker: ProgressTracker) -> Self {
        self.connector = server_connector(&self.config, Some(tracker));
        self
    }

    /// Replaces how job clients are built.
    pub fn with_job_client_connector(mut self, connector: JobClientConnector) -> Self {
        self.connector = connector;
        self
    }

    /// Uses `transfer` for every session instead of building one per method.
    pub fn with_transfer(mut self, transfer: Arc<dyn FileTransfer>) -> Self {
        self.transfer_override = Some(transfer);
        self
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    /// Starts `instance_id`, waits until its server on `port` is healthy and
    /// returns a session bound to a `method` transfer.
    ///
    /// Once a start has been attempted, any failure here stops the instance
    /// again before the error is returned. A start request that timed out
    /// may still have reached the provider.
    pub async fn create_session(
        &self,
        instance_id: &str,
        port: u16,
        method: TransferMethod,
    ) -> Result<RemoteSession, RemoteError> {
        let server_url = self.config.server_url(instance_id, port);
        let result = match self.provider.start_instance(instance_id).await {
            Ok(()) => self.assemble(instance_id, &server_url, method).await,
            // The provider CLI never ran, so nothing can be running.
            Err(e @ RemoteError::Tool(ToolError::NotFound { .. })) => return Err(e),
            Err(e) => Err(e),
        };

        match result {
            Ok(session) => {
                info!("Connected to {} via {}", server_url, session.transfer_name());
                Ok(session)
            }
            Err(e) => {
                error!("Session setup for {} failed: {}", instance_id, e);
                if let Err(stop) = self.provider.stop_instance(instance_id).await {
                    error!("Failed to stop instance {}: {}", instance_id, stop);
                }
                Err(e)
            }
        }
    }

    async fn assemble(
        &self,
        instance_id: &str,
        server_url: &str,
        method: TransferMethod,
    ) -> Result<RemoteSession, RemoteError> {
        self.wait_until_ready(instance_id, server_url).await?;
        let transfer = self.build_transfer(instance_id, method).await?;
        let jobs = (self.connector)(server_url)?;

        Ok(RemoteSession::new(
            instance_id,
            server_url,
            Arc::clone(&self.provider),
            transfer,
            jobs,
        )
        .with_polling(self.config.job_poll_interval(), self.config.job_timeout()))
    }

    async fn wait_until_ready(&self, instance_id: &str, server_url: &str) -> Result<(), RemoteError> {
        let start = Instant::now();
        let deadline = self.config.ready_timeout();
        info!("Waiting for {} to become healthy", server_url);

        loop {
            if self.provider.health(server_url).await {
                info!("{} ready after {}s", instance_id, start.elapsed().as_secs());
                return Ok(());
            }

            let elapsed = start.elapsed();
            if elapsed >= deadline {
                return Err(RemoteError::NotReady {
                    instance_id: instance_id.to_string(),
                    waited_secs: elapsed.as_secs(),
                });
            }
            debug!("{} not ready yet", instance_id);
            tokio::time::sleep(self.config.health_interval().min(deadline - elapsed)).await;
        }
    }

    async fn build_transfer(
        &self,
        instance_id: &str,
        method: TransferMethod,
    ) -> Result<Arc<dyn FileTransfer>, RemoteError> {
        if let Some(ref transfer) = self.transfer_override {
            return Ok(Arc::clone(transfer));
        }

        match method {
            TransferMethod::Scp => {
                let endpoint = self.provider.ssh_endpoint(instance_id).await?;
                Ok(Arc::new(ScpTransfer::new(&self.config, endpoint)))
            }
            TransferMethod::Relay => Ok(Arc::new(RelayTransfer::new(&self.config))),
        }
    }
}
