//! Bounded-concurrency executor for work items.

use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{error, info, warn};

use crate::progress::ProgressTracker;

use super::config::RunnerConfig;
use super::error::{ItemError, RunnerError};
use super::retry::{run_with_retry, AttemptFailure};
use super::types::{BatchReport, ItemFailure, ItemOperation, WorkItem};

/// Runs an operation over many items with a bounded number of workers.
///
/// Every item gets its own task. A semaphore bounds how many run at once,
/// transient errors are retried per item, and failures (including panics)
/// are recorded against the item without affecting its siblings.
#[derive(Debug, Clone)]
pub struct ItemRunner {
    config: RunnerConfig,
    progress: Option<ProgressTracker>,
}

type ItemOutcome = (String, Result<(PathBuf, u32), AttemptFailure>);

impl ItemRunner {
    /// Creates a runner.
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            progress: None,
        }
    }

    /// Reports batch progress (one unit per finished item) to `tracker`.
    pub fn with_progress(mut self, tracker: ProgressTracker) -> Self {
        self.progress = Some(tracker);
        self
    }

    /// Overrides the worker bound.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.config.max_workers = max_workers;
        self
    }

    /// Returns the runner configuration.
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Processes `items` with `operation`.
    ///
    /// `label` names the batch in logs and in the progress tracker. When
    /// `output_dir` is given and the config asks for it, the directory is
    /// created before any item runs. Results come back in completion order.
    pub async fn run(
        &self,
        label: &str,
        items: Vec<WorkItem>,
        operation: Arc<dyn ItemOperation>,
        output_dir: Option<&Path>,
    ) -> Result<BatchReport, RunnerError> {
        let start = Instant::now();
        let total = items.len();

        if total == 0 {
            warn!("{}: no items to process", label);
            return Ok(BatchReport::default());
        }

        if let (Some(dir), true) = (output_dir, self.config.create_output_dir) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| RunnerError::OutputDirectory {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }
        if let Some(dir) = output_dir {
            operation
                .prepare(dir)
                .await
                .map_err(|source| RunnerError::Prepare {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }

        let workers = self.config.max_workers.max(1);
        info!(
            "{}: processing {} items with {} workers ({})",
            label,
            total,
            workers,
            operation.name()
        );

        let meter = self.progress.as_ref().map(|p| p.start(label, total as u64));
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks: JoinSet<ItemOutcome> = JoinSet::new();
        let mut task_items: HashMap<Id, String> = HashMap::with_capacity(total);

        for item in items {
            let semaphore = Arc::clone(&semaphore);
            let operation = Arc::clone(&operation);
            let retry = self.config.retry.clone();
            let spawned_id = item.id.clone();

            let handle = tasks.spawn(async move {
                let item_id = item.id.clone();
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (
                        item_id,
                        Err(AttemptFailure {
                            error: ItemError::permanent("worker pool closed"),
                            attempts: 0,
                        }),
                    );
                };

                let attempt = AssertUnwindSafe(run_with_retry(operation.as_ref(), &item, &retry))
                    .catch_unwind()
                    .await;

                let result = attempt.unwrap_or_else(|payload| {
                    Err(AttemptFailure {
                        error: ItemError::Panicked(panic_message(payload.as_ref())),
                        attempts: 1,
                    })
                });
                (item_id, result)
            });
            task_items.insert(handle.id(), spawned_id);
        }

        let mut report = BatchReport {
            total,
            ..Default::default()
        };

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, (_, Ok((output, _attempts))))) => report.outputs.push(output),
                Ok((_, (item_id, Err(failure)))) => {
                    error!(
                        "{}: failed to process {} after {} attempt(s): {}",
                        label, item_id, failure.attempts, failure.error
                    );
                    report.failures.push(ItemFailure {
                        item_id,
                        retryable: failure.error.is_retryable(),
                        error: failure.error.to_string(),
                        attempts: failure.attempts,
                    });
                }
                // Panics are caught inside the task, so this only happens
                // if the runtime is shutting down.
                Err(e) => {
                    let item_id = task_items
                        .remove(&e.id())
                        .unwrap_or_else(|| "<unknown>".to_string());
                    error!("{}: worker task for {} aborted: {}", label, item_id, e);
                    report.failures.push(aborted_failure(item_id, &e));
                }
            }

            if let Some(ref meter) = meter {
                meter.update(1);
            }
        }

        if let Some(meter) = meter {
            meter.finish();
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "{}: {} of {} items succeeded in {}ms",
            label,
            report.succeeded(),
            total,
            report.duration_ms
        );

        Ok(report)
    }
}

fn aborted_failure(item_id: String, err: &JoinError) -> ItemFailure {
    ItemFailure {
        item_id,
        error: format!("worker task aborted: {err}"),
        attempts: 0,
        retryable: err.is_cancelled(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RetryConfig;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{sleep, Duration};

    /// Fails permanently for ids in `bad`, panics for ids in `panics`.
    struct ScriptedOperation {
        bad: HashSet<String>,
        panics: HashSet<String>,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedOperation {
        fn new(bad: &[&str], panics: &[&str]) -> Self {
            Self {
                bad: bad.iter().map(|s| s.to_string()).collect(),
                panics: panics.iter().map(|s| s.to_string()).collect(),
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ItemOperation for ScriptedOperation {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn run(&self, item: &WorkItem) -> Result<PathBuf, ItemError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_millis(5)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            if self.panics.contains(&item.id) {
                panic!("decoder crashed on {}", item.id);
            }
            if self.bad.contains(&item.id) {
                return Err(ItemError::permanent("corrupt image"));
            }
            Ok(item.destination.clone())
        }
    }

    fn items(n: usize) -> Vec<WorkItem> {
        (0..n)
            .map(|i| WorkItem::file(format!("/in/{i}.png"), format!("/out/{i}.png")))
            .collect()
    }

    fn runner(workers: usize) -> ItemRunner {
        ItemRunner::new(
            RunnerConfig::default()
                .with_max_workers(workers)
                .with_retry(RetryConfig::no_retry()),
        )
    }

    #[tokio::test]
    async fn test_all_items_succeed() {
        let op = Arc::new(ScriptedOperation::new(&[], &[]));
        let report = runner(4).run("batch", items(10), op, None).await.unwrap();

        assert_eq!(report.total, 10);
        assert_eq!(report.succeeded(), 10);
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn test_single_failure_does_not_affect_siblings() {
        let op = Arc::new(ScriptedOperation::new(&["3.png"], &[]));
        let report = runner(4).run("batch", items(10), op, None).await.unwrap();

        assert_eq!(report.succeeded(), 9);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.failures[0].item_id, "3.png");
        assert!(!report.failures[0].retryable);
        assert!(!report.outputs.contains(&PathBuf::from("/out/3.png")));
    }

    #[tokio::test]
    async fn test_panic_is_attributed_to_its_item() {
        let op = Arc::new(ScriptedOperation::new(&[], &["5.png"]));
        let report = runner(2).run("batch", items(8), op, None).await.unwrap();

        assert_eq!(report.succeeded(), 7);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].item_id, "5.png");
        assert!(report.failures[0].error.contains("decoder crashed"));
    }

    #[tokio::test]
    async fn test_aborted_task_is_recorded_against_its_item() {
        let mut tasks: JoinSet<()> = JoinSet::new();
        let handle = tasks.spawn(std::future::pending());
        let mut task_items = HashMap::new();
        task_items.insert(handle.id(), "7.png".to_string());
        handle.abort();

        let err = tasks.join_next_with_id().await.unwrap().unwrap_err();
        let item_id = task_items.remove(&err.id()).unwrap();
        let failure = aborted_failure(item_id, &err);

        assert_eq!(failure.item_id, "7.png");
        assert_eq!(failure.attempts, 0);
        assert!(failure.retryable);
        assert!(failure.error.contains("aborted"));
    }

    #[tokio::test]
    async fn test_worker_bound_is_respected() {
        let op = Arc::new(ScriptedOperation::new(&[], &[]));
        let report = runner(3)
            .run("batch", items(20), Arc::clone(&op) as Arc<dyn ItemOperation>, None)
            .await
            .unwrap();

        assert_eq!(report.succeeded(), 20);
        assert!(op.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_output_dir_created_up_front() {
        let temp = tempfile::tempdir().unwrap();
        let out = temp.path().join("nested").join("out");
        let op = Arc::new(ScriptedOperation::new(&["0.png"], &[]));

        runner(1).run("batch", items(1), op, Some(&out)).await.unwrap();
        assert!(out.is_dir());
    }

    #[tokio::test]
    async fn test_empty_batch_creates_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let out = temp.path().join("out");
        let op = Arc::new(ScriptedOperation::new(&[], &[]));

        let report = runner(1).run("batch", vec![], op, Some(&out)).await.unwrap();
        assert_eq!(report.total, 0);
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_progress_meter_removed_after_batch() {
        let tracker = ProgressTracker::new();
        let op = Arc::new(ScriptedOperation::new(&[], &[]));

        runner(2)
            .with_progress(tracker.clone())
            .run("deskew", items(4), op, None)
            .await
            .unwrap();

        assert!(!tracker.is_active("deskew"));
    }
}
