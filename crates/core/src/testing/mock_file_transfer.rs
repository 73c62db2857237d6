//! Mock file transfer for testing.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::remote::{FileTransfer, RemoteError};

/// Mock implementation of the FileTransfer trait.
///
/// Uploads return `/workspace/<file name>`.
#[derive(Debug, Clone, Default)]
pub struct MockFileTransfer {
    uploads: Arc<RwLock<Vec<PathBuf>>>,
    close_count: Arc<RwLock<usize>>,
    fail_upload: Arc<RwLock<bool>>,
}

impl MockFileTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make uploads fail as if no credential arrived.
    pub async fn set_fail_upload(&self, fail: bool) {
        *self.fail_upload.write().await = fail;
    }

    /// Files uploaded so far.
    pub async fn uploads(&self) -> Vec<PathBuf> {
        self.uploads.read().await.clone()
    }

    /// Number of times the transfer was closed.
    pub async fn close_count(&self) -> usize {
        *self.close_count.read().await
    }
}

#[async_trait]
impl FileTransfer for MockFileTransfer {
    fn name(&self) -> &str {
        "mock"
    }

    async fn upload(&self, local_path: &Path) -> Result<String, RemoteError> {
        if *self.fail_upload.read().await {
            return Err(RemoteError::CredentialTimeout { attempts: 1 });
        }
        self.uploads.write().await.push(local_path.to_path_buf());

        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(format!("/workspace/{name}"))
    }

    async fn close(&self) -> Result<(), RemoteError> {
        *self.close_count.write().await += 1;
        Ok(())
    }
}
