//! Sequential stage controller.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::runner::{ItemRunner, WorkItem};

use super::error::{PipelineError, StageError};
use super::remote_stage::run_remote_stage;
use super::types::{
    LocalStage, PipelineReport, StageDescriptor, StageOperation, StageOutcome, StageReport,
};

/// Runs stages in order, skipping those whose output already exists.
///
/// A failed stage stops the run. Because stage outputs only appear once a
/// stage has run, rerunning the same controller resumes where it stopped.
pub struct PipelineController {
    stages: Vec<StageDescriptor>,
    runner: ItemRunner,
}

impl PipelineController {
    /// Creates a controller. Local stages run through `runner`.
    pub fn new(stages: Vec<StageDescriptor>, runner: ItemRunner) -> Self {
        Self { stages, runner }
    }

    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    /// Each stage with whether it would be skipped right now.
    pub fn plan(&self) -> Vec<(&str, bool)> {
        self.stages
            .iter()
            .map(|s| (s.name.as_str(), s.is_done()))
            .collect()
    }

    /// Runs every stage that is not done yet.
    pub async fn run(&self) -> Result<PipelineReport, PipelineError> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start = Instant::now();
        let mut reports = Vec::with_capacity(self.stages.len());

        info!("Pipeline run {} with {} stages", run_id, self.stages.len());

        for stage in &self.stages {
            if stage.is_done() {
                info!("Skipping stage {}: {} exists", stage.name, stage.output.display());
                reports.push(StageReport {
                    name: stage.name.clone(),
                    outcome: StageOutcome::Skipped,
                });
                continue;
            }

            info!(
                "Running stage {} ({}): {} -> {}",
                stage.name,
                stage.operation.kind(),
                stage.input.display(),
                stage.output.display()
            );
            let stage_start = Instant::now();

            match self.run_stage(stage).await {
                Ok((items, failed)) => {
                    let duration_ms = stage_start.elapsed().as_millis() as u64;
                    info!("Stage {} done in {}ms", stage.name, duration_ms);
                    reports.push(StageReport {
                        name: stage.name.clone(),
                        outcome: StageOutcome::Completed {
                            items,
                            failed,
                            duration_ms,
                        },
                    });
                }
                Err(source) => {
                    error!("Stage {} failed: {}", stage.name, source);
                    return Err(PipelineError::StageFailed {
                        stage: stage.name.clone(),
                        source,
                    });
                }
            }
        }

        Ok(PipelineReport {
            run_id,
            started_at,
            stages: reports,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Runs one stage, returning (succeeded items, failed items).
    async fn run_stage(&self, stage: &StageDescriptor) -> Result<(usize, usize), StageError> {
        match &stage.operation {
            StageOperation::Local(local) => self.run_local(stage, local).await,
            StageOperation::Remote(remote) => {
                run_remote_stage(remote, &stage.input, &stage.output).await?;
                Ok((1, 0))
            }
            StageOperation::Task(task) => {
                task.run(&stage.input, &stage.output).await?;
                Ok((1, 0))
            }
        }
    }

    async fn run_local(
        &self,
        stage: &StageDescriptor,
        local: &LocalStage,
    ) -> Result<(usize, usize), StageError> {
        if !stage.input.is_dir() {
            return Err(StageError::MissingInput {
                path: stage.input.clone(),
            });
        }

        let items: Vec<WorkItem> = list_inputs(&stage.input, local)?
            .into_iter()
            .filter_map(|path| {
                let name = path.file_name()?.to_owned();
                Some(WorkItem::file(&path, stage.output.join(name)))
            })
            .collect();

        let runner = match local.workers {
            Some(workers) => self.runner.clone().with_max_workers(workers),
            None => self.runner.clone(),
        };
        let report = runner
            .run(
                &stage.name,
                items,
                Arc::clone(&local.operation),
                Some(&stage.output),
            )
            .await?;

        if report.failed() > 0 {
            warn!(
                "Stage {}: {} of {} items failed",
                stage.name,
                report.failed(),
                report.total
            );
        }
        Ok((report.succeeded(), report.failed()))
    }
}

/// Regular, non-hidden files of `dir` accepted by the stage, sorted.
fn list_inputs(dir: &Path, stage: &LocalStage) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let hidden = path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with('.'));
        if path.is_file() && !hidden && stage.accepts(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SkipPredicate;
    use crate::runner::{RetryConfig, RunnerConfig};
    use crate::testing::{MockTask, MockTransform};

    fn runner() -> ItemRunner {
        ItemRunner::new(
            RunnerConfig::default()
                .with_max_workers(2)
                .with_retry(RetryConfig::no_retry()),
        )
    }

    #[tokio::test]
    async fn test_stages_run_in_order() {
        let temp = tempfile::tempdir().unwrap();
        let a = MockTask::new("a");
        let b = MockTask::new("b");
        let controller = PipelineController::new(
            vec![
                StageDescriptor::task("a", temp.path(), temp.path().join("a.out"), Arc::new(a.clone())),
                StageDescriptor::task("b", temp.path().join("a.out"), temp.path().join("b.out"), Arc::new(b.clone())),
            ],
            runner(),
        );

        let report = controller.run().await.unwrap();
        assert_eq!(report.executed(), vec!["a", "b"]);
        assert_eq!(a.run_count().await, 1);
        assert_eq!(b.run_count().await, 1);
    }

    #[tokio::test]
    async fn test_existing_output_is_skipped() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir(temp.path().join("done")).unwrap();
        let task = MockTask::new("t");
        let controller = PipelineController::new(
            vec![StageDescriptor::task("t", temp.path(), temp.path().join("done"), Arc::new(task.clone()))],
            runner(),
        );

        assert_eq!(controller.plan(), vec![("t", true)]);
        let report = controller.run().await.unwrap();
        assert_eq!(report.skipped(), vec!["t"]);
        assert_eq!(task.run_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_stage_halts_run() {
        let temp = tempfile::tempdir().unwrap();
        let failing = MockTask::new("extract");
        failing.set_fail(true).await;
        let later = MockTask::new("convert");

        let controller = PipelineController::new(
            vec![
                StageDescriptor::task("extract", temp.path(), temp.path().join("x"), Arc::new(failing)),
                StageDescriptor::task("convert", temp.path().join("x"), temp.path().join("y"), Arc::new(later.clone())),
            ],
            runner(),
        );

        let err = controller.run().await.unwrap_err();
        assert_eq!(err.stage(), Some("extract"));
        assert_eq!(later.run_count().await, 0);
        assert!(!temp.path().join("x").exists());
    }

    #[tokio::test]
    async fn test_local_stage_filters_and_skips_hidden() {
        let temp = tempfile::tempdir().unwrap();
        let input = temp.path().join("jp2");
        std::fs::create_dir(&input).unwrap();
        for name in ["0001.jp2", "0002.JP2", "readme.txt", ".0003.jp2"] {
            std::fs::write(input.join(name), b"x").unwrap();
        }

        let transform = MockTransform::new();
        let controller = PipelineController::new(
            vec![StageDescriptor::local(
                "convert",
                &input,
                temp.path().join("out"),
                LocalStage::new(Arc::new(transform.clone())).with_extensions(["jp2"]),
            )],
            runner(),
        );

        let report = controller.run().await.unwrap();
        match &report.stages[0].outcome {
            StageOutcome::Completed { items, failed, .. } => {
                assert_eq!(*items, 2);
                assert_eq!(*failed, 0);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(transform.processed().await.len(), 2);
    }

    #[tokio::test]
    async fn test_never_predicate_always_runs() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir(temp.path().join("out")).unwrap();
        let task = MockTask::new("t");
        let controller = PipelineController::new(
            vec![StageDescriptor::task("t", temp.path(), temp.path().join("out"), Arc::new(task.clone()))
                .with_skip(SkipPredicate::Never)],
            runner(),
        );

        controller.run().await.unwrap();
        controller.run().await.unwrap();
        assert_eq!(task.run_count().await, 2);
    }
}
