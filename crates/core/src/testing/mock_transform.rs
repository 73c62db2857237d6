//! Mock per-item operation for testing.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::runner::{ItemError, ItemOperation, WorkItem};

/// Mock implementation of the ItemOperation trait.
///
/// Copies each input file to its destination. Items listed with
/// [`fail_on`](MockTransform::fail_on) fail permanently, as a corrupt page
/// would.
#[derive(Debug, Clone, Default)]
pub struct MockTransform {
    failing: Arc<RwLock<HashSet<String>>>,
    processed: Arc<RwLock<Vec<PathBuf>>>,
}

impl MockTransform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the item with this id (its file name).
    pub async fn fail_on(&self, item_id: &str) {
        self.failing.write().await.insert(item_id.to_string());
    }

    /// Outputs written so far.
    pub async fn processed(&self) -> Vec<PathBuf> {
        self.processed.read().await.clone()
    }
}

#[async_trait]
impl ItemOperation for MockTransform {
    fn name(&self) -> &str {
        "mock"
    }

    async fn run(&self, item: &WorkItem) -> Result<PathBuf, ItemError> {
        let input = item.require_file()?;
        if self.failing.read().await.contains(&item.id) {
            return Err(ItemError::permanent(format!("corrupt input {}", item.id)));
        }
        if !input.is_file() {
            return Err(ItemError::InputNotFound {
                path: input.to_path_buf(),
            });
        }

        if let Some(parent) = item.destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(input, &item.destination).await?;
        self.processed.write().await.push(item.destination.clone());
        Ok(item.destination.clone())
    }
}
