//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of every external seam
//! (archiver, classifier, compute provider, job server, file transfer),
//! allowing pipeline runs to be tested without tools, network or GPUs.
//!
//! # Example
//!
//! ```rust,ignore
//! use scanpress_core::testing::{MockComputeProvider, MockFileTransfer, MockJobClient};
//!
//! let provider = MockComputeProvider::new();
//! let jobs = MockJobClient::new();
//! jobs.set_status_sequence(vec![JobStatus::Running, JobStatus::Completed]).await;
//!
//! // ... build a RemoteSessionFactory over the mocks ...
//! assert_eq!(provider.stop_calls().await.len(), 1);
//! ```

mod mock_archiver;
mod mock_classifier;
mod mock_compute_provider;
mod mock_file_transfer;
mod mock_job_client;
mod mock_task;
mod mock_transform;

pub use mock_archiver::MockArchiver;
pub use mock_classifier::MockClassifier;
pub use mock_compute_provider::MockComputeProvider;
pub use mock_file_transfer::MockFileTransfer;
pub use mock_job_client::MockJobClient;
pub use mock_task::MockTask;
pub use mock_transform::MockTransform;

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use crate::remote::{JobClient, RemoteConfig, RemoteSessionFactory};

    use super::{MockComputeProvider, MockFileTransfer, MockJobClient};

    /// Write `count` page files named `0001.<ext>`, `0002.<ext>`, ... into `dir`.
    pub fn write_pages(dir: &Path, count: usize, ext: &str) -> Vec<PathBuf> {
        std::fs::create_dir_all(dir).expect("create page directory");
        (1..=count)
            .map(|i| {
                let path = dir.join(format!("{:04}.{}", i, ext));
                std::fs::write(&path, format!("page {}", i)).expect("write page");
                path
            })
            .collect()
    }

    /// Remote config with instant polling and short deadlines.
    pub fn fast_remote_config() -> RemoteConfig {
        RemoteConfig {
            enabled: true,
            instance_id: "pod-test".to_string(),
            url_template: "http://{instance_id}:{port}".to_string(),
            health_interval_secs: 0,
            ready_timeout_secs: 1,
            job_poll_interval_secs: 0,
            job_timeout_secs: 1,
            ..Default::default()
        }
    }

    /// Session factory wired to the given mocks.
    pub fn mock_factory(
        config: RemoteConfig,
        provider: &MockComputeProvider,
        transfer: &MockFileTransfer,
        jobs: &MockJobClient,
    ) -> RemoteSessionFactory {
        let jobs = jobs.clone();
        RemoteSessionFactory::new(config, Arc::new(provider.clone()))
            .with_transfer(Arc::new(transfer.clone()))
            .with_job_client_connector(Arc::new(move |_url: &str| {
                Ok(Arc::new(jobs.clone()) as Arc<dyn JobClient>)
            }))
    }
}
