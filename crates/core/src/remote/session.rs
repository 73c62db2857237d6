//! Handle to one leased remote instance.

use futures::FutureExt;
use std::future::Future;
use std::panic::{resume_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::error::RemoteError;
use super::traits::{ComputeProvider, FileTransfer, JobClient};
use super::types::{JobRecord, JobRequest};

/// A leased instance with its transfer strategy and job client.
///
/// The instance keeps running (and costing money) until [`teardown`] is
/// called. Prefer [`scoped`], which tears down whatever the body does.
///
/// [`teardown`]: RemoteSession::teardown
/// [`scoped`]: RemoteSession::scoped
pub struct RemoteSession {
    instance_id: String,
    server_url: String,
    provider: Arc<dyn ComputeProvider>,
    transfer: Arc<dyn FileTransfer>,
    jobs: Arc<dyn JobClient>,
    poll_interval: Duration,
    job_timeout: Duration,
    torn_down: AtomicBool,
}

impl RemoteSession {
    /// Creates a session for an instance that is already reachable.
    pub fn new(
        instance_id: impl Into<String>,
        server_url: impl Into<String>,
        provider: Arc<dyn ComputeProvider>,
        transfer: Arc<dyn FileTransfer>,
        jobs: Arc<dyn JobClient>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            server_url: server_url.into(),
            provider,
            transfer,
            jobs,
            poll_interval: Duration::from_secs(10),
            job_timeout: Duration::from_secs(7200),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Sets the job polling interval and deadline.
    pub fn with_polling(mut self, interval: Duration, job_timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.job_timeout = job_timeout;
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Name of the bound transfer strategy.
    pub fn transfer_name(&self) -> &str {
        self.transfer.name()
    }

    /// Whether teardown has run.
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// Uploads a file with the bound transfer strategy.
    pub async fn upload(&self, path: &Path) -> Result<String, RemoteError> {
        self.transfer.upload(path).await
    }

    /// Submits a job and returns its id.
    pub async fn submit_job(&self, request: &JobRequest) -> Result<String, RemoteError> {
        self.jobs.create_job(request).await
    }

    /// Polls a job until it completes or fails.
    ///
    /// Retryable status errors are logged and polling continues; the job
    /// deadline bounds the whole wait.
    pub async fn poll_until_terminal(&self, job_id: &str) -> Result<JobRecord, RemoteError> {
        let start = Instant::now();

        loop {
            match self.jobs.job_status(job_id).await {
                Ok(record) if record.status.is_terminal() => {
                    info!("Job {} finished: {:?}", job_id, record.status);
                    return Ok(record);
                }
                Ok(record) => debug!("Job {} is {:?}", job_id, record.status),
                Err(e) if e.is_retryable() => warn!("Status check for job {} failed: {}", job_id, e),
                Err(e) => return Err(e),
            }

            let elapsed = start.elapsed();
            if elapsed >= self.job_timeout {
                return Err(RemoteError::JobTimeout {
                    job_id: job_id.to_string(),
                    waited_secs: elapsed.as_secs(),
                });
            }
            tokio::time::sleep(self.poll_interval.min(self.job_timeout - elapsed)).await;
        }
    }

    /// Downloads a job output.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<u64, RemoteError> {
        self.jobs.download(url, dest).await
    }

    /// Stops the instance and releases the transfer strategy.
    ///
    /// Only the first call does anything. Both steps are attempted even if
    /// the first one fails; the first error is returned.
    pub async fn teardown(&self) -> Result<(), RemoteError> {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Tearing down session on {}", self.instance_id);

        let stopped = self.provider.stop_instance(&self.instance_id).await;
        if let Err(ref e) = stopped {
            error!("Failed to stop instance {}: {}", self.instance_id, e);
        }
        let closed = self.transfer.close().await;
        if let Err(ref e) = closed {
            error!("Failed to close {} transfer: {}", self.transfer.name(), e);
        }

        stopped.and(closed)
    }

    /// Runs `body` against this session, then tears it down.
    ///
    /// Teardown runs whether the body succeeds, fails or panics; a panic
    /// is resumed afterwards. A teardown failure is reported only when the
    /// body itself succeeded.
    pub async fn scoped<'s, F, Fut, T, E>(&'s self, body: F) -> Result<T, E>
    where
        F: FnOnce(&'s Self) -> Fut,
        Fut: Future<Output = Result<T, E>> + 's,
        E: From<RemoteError>,
    {
        let outcome = AssertUnwindSafe(body(self)).catch_unwind().await;
        let teardown = self.teardown().await;

        match outcome {
            Err(panic) => resume_unwind(panic),
            Ok(Ok(value)) => teardown.map(|_| value).map_err(E::from),
            Ok(Err(e)) => Err(e),
        }
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        if !self.is_torn_down() {
            warn!(
                "Session on {} dropped without teardown; the instance may still be running",
                self.instance_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::JobStatus;
    use crate::testing::{MockComputeProvider, MockFileTransfer, MockJobClient};

    struct Fixture {
        provider: MockComputeProvider,
        transfer: MockFileTransfer,
        jobs: MockJobClient,
        session: RemoteSession,
    }

    fn fixture() -> Fixture {
        let provider = MockComputeProvider::new();
        let transfer = MockFileTransfer::new();
        let jobs = MockJobClient::new();
        let session = RemoteSession::new(
            "pod1",
            "http://pod1/",
            Arc::new(provider.clone()),
            Arc::new(transfer.clone()),
            Arc::new(jobs.clone()),
        )
        .with_polling(Duration::from_millis(5), Duration::from_millis(200));

        Fixture {
            provider,
            transfer,
            jobs,
            session,
        }
    }

    #[tokio::test]
    async fn test_teardown_is_effective_once() {
        let f = fixture();
        f.session.teardown().await.unwrap();
        f.session.teardown().await.unwrap();

        assert!(f.session.is_torn_down());
        assert_eq!(f.provider.stop_calls().await, vec!["pod1"]);
        assert_eq!(f.transfer.close_count().await, 1);
    }

    #[tokio::test]
    async fn test_teardown_closes_transfer_when_stop_fails() {
        let f = fixture();
        f.provider.set_fail_stop(true).await;

        assert!(f.session.teardown().await.is_err());
        assert_eq!(f.transfer.close_count().await, 1);
    }

    #[tokio::test]
    async fn test_poll_returns_terminal_record() {
        let f = fixture();
        f.jobs
            .set_status_sequence(vec![JobStatus::Queued, JobStatus::Running, JobStatus::Completed])
            .await;

        let record = f.session.poll_until_terminal("job-1").await.unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(f.jobs.status_calls().await, 3);
        f.session.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_poll_deadline() {
        let f = fixture();
        f.jobs.set_status_sequence(vec![JobStatus::Running]).await;

        let err = f.session.poll_until_terminal("job-1").await.unwrap_err();
        assert!(matches!(err, RemoteError::JobTimeout { .. }));
        f.session.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_scoped_tears_down_on_error() {
        let f = fixture();
        let result: Result<(), RemoteError> = f
            .session
            .scoped(|_s| async { Err(RemoteError::Transfer("broken pipe".into())) })
            .await;

        assert!(result.is_err());
        assert!(f.session.is_torn_down());
        assert_eq!(f.provider.stop_calls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_scoped_tears_down_on_panic() {
        let f = fixture();
        let session = &f.session;

        let caught = AssertUnwindSafe(session.scoped(|_s| async {
            if true {
                panic!("body exploded");
            }
            Ok::<(), RemoteError>(())
        }))
        .catch_unwind()
        .await;

        assert!(caught.is_err());
        assert!(f.session.is_torn_down());
        assert_eq!(f.provider.stop_calls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_scoped_reports_teardown_failure_after_success() {
        let f = fixture();
        f.provider.set_fail_stop(true).await;

        let result: Result<u32, RemoteError> = f.session.scoped(|_s| async { Ok(7) }).await;
        assert!(result.is_err());
    }
}
