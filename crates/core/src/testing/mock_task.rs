//! Mock single-shot stage task for testing.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::pipeline::{StageError, StageTask};

/// Mock implementation of the StageTask trait.
///
/// A successful run creates the output directory.
#[derive(Debug, Clone)]
pub struct MockTask {
    name: String,
    runs: Arc<RwLock<usize>>,
    fail: Arc<RwLock<bool>>,
}

impl MockTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            runs: Arc::new(RwLock::new(0)),
            fail: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn set_fail(&self, fail: bool) {
        *self.fail.write().await = fail;
    }

    /// Number of times the task ran.
    pub async fn run_count(&self) -> usize {
        *self.runs.read().await
    }
}

#[async_trait]
impl StageTask for MockTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _input: &Path, output: &Path) -> Result<(), StageError> {
        *self.runs.write().await += 1;
        if *self.fail.read().await {
            return Err(StageError::failed(format!("{} failed", self.name)));
        }
        tokio::fs::create_dir_all(output).await?;
        Ok(())
    }
}
