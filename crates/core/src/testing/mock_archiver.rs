//! Mock archiver for testing.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::archive::{ArchiveError, Archiver};

/// Mock implementation of the Archiver trait.
///
/// Extraction writes the configured files (relative paths) into the
/// destination; packing writes a placeholder archive.
///
/// # Example
///
/// ```rust,ignore
/// use scanpress_core::testing::MockArchiver;
///
/// let archiver = MockArchiver::new();
/// archiver.add_extracted_file("book_jp2/0001.jp2").await;
///
/// archiver.extract(&zip, &dest).await?;
/// assert!(dest.join("book_jp2/0001.jp2").is_file());
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockArchiver {
    extracted_files: Arc<RwLock<Vec<PathBuf>>>,
    extract_calls: Arc<RwLock<Vec<(PathBuf, PathBuf)>>>,
    pack_calls: Arc<RwLock<Vec<(PathBuf, PathBuf)>>>,
    fail_extract: Arc<RwLock<bool>>,
    fail_pack: Arc<RwLock<bool>>,
}

impl MockArchiver {
    /// Create a new mock archiver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file (relative to the destination) produced by every extraction.
    pub async fn add_extracted_file(&self, relative: impl Into<PathBuf>) {
        self.extracted_files.write().await.push(relative.into());
    }

    /// Make extraction fail.
    pub async fn set_fail_extract(&self, fail: bool) {
        *self.fail_extract.write().await = fail;
    }

    /// Make packing fail.
    pub async fn set_fail_pack(&self, fail: bool) {
        *self.fail_pack.write().await = fail;
    }

    /// Recorded (archive, destination) pairs.
    pub async fn extract_calls(&self) -> Vec<(PathBuf, PathBuf)> {
        self.extract_calls.read().await.clone()
    }

    /// Recorded (source directory, archive) pairs.
    pub async fn pack_calls(&self) -> Vec<(PathBuf, PathBuf)> {
        self.pack_calls.read().await.clone()
    }
}

#[async_trait]
impl Archiver for MockArchiver {
    fn name(&self) -> &str {
        "mock"
    }

    async fn extract(&self, archive: &Path, dest: &Path) -> Result<(), ArchiveError> {
        self.extract_calls
            .write()
            .await
            .push((archive.to_path_buf(), dest.to_path_buf()));

        if *self.fail_extract.read().await {
            return Err(ArchiveError::UnsupportedFormat {
                path: archive.to_path_buf(),
            });
        }

        tokio::fs::create_dir_all(dest).await?;
        for relative in self.extracted_files.read().await.iter() {
            let path = dest.join(relative);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, b"page").await?;
        }
        Ok(())
    }

    async fn pack(&self, source_dir: &Path, archive: &Path) -> Result<(), ArchiveError> {
        self.pack_calls
            .write()
            .await
            .push((source_dir.to_path_buf(), archive.to_path_buf()));

        if *self.fail_pack.read().await {
            return Err(ArchiveError::UnsupportedFormat {
                path: archive.to_path_buf(),
            });
        }

        if let Some(parent) = archive.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(archive, b"PK").await?;
        Ok(())
    }
}
