//! Mock page classifier for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::runner::ItemError;
use crate::transform::{PageClassifier, PageType};

/// Mock implementation of the PageClassifier trait.
///
/// Labels are looked up by file name; unknown files get the default label.
#[derive(Debug, Clone)]
pub struct MockClassifier {
    default: PageType,
    labels: Arc<RwLock<HashMap<String, PageType>>>,
    failing: Arc<RwLock<HashSet<String>>>,
    calls: Arc<RwLock<Vec<PathBuf>>>,
}

impl MockClassifier {
    /// Create a classifier answering `default` for every page.
    pub fn new(default: PageType) -> Self {
        Self {
            default,
            labels: Arc::new(RwLock::new(HashMap::new())),
            failing: Arc::new(RwLock::new(HashSet::new())),
            calls: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Set the label for a file name.
    pub async fn set_label(&self, file_name: &str, page_type: PageType) {
        self.labels
            .write()
            .await
            .insert(file_name.to_string(), page_type);
    }

    /// Fail classification of a file name.
    pub async fn fail_on(&self, file_name: &str) {
        self.failing.write().await.insert(file_name.to_string());
    }

    /// Images classified so far.
    pub async fn calls(&self) -> Vec<PathBuf> {
        self.calls.read().await.clone()
    }
}

#[async_trait]
impl PageClassifier for MockClassifier {
    fn name(&self) -> &str {
        "mock"
    }

    async fn classify(&self, image: &Path) -> Result<PageType, ItemError> {
        self.calls.write().await.push(image.to_path_buf());

        let name = image
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if self.failing.read().await.contains(&name) {
            return Err(ItemError::permanent(format!("cannot classify {name}")));
        }
        Ok(self
            .labels
            .read()
            .await
            .get(&name)
            .copied()
            .unwrap_or(self.default))
    }
}
