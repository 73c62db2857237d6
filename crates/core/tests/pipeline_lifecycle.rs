//! Pipeline lifecycle integration tests.
//!
//! These tests verify the stage controller with mock operations:
//! - Skipping stages whose output already exists
//! - Per-item failures that do not fail the stage
//! - Halting on a failed stage and resuming on rerun
//! - Remote stages that always release their instance

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use scanpress_core::{
    pipeline::{LocalStage, RemoteStage, StageDescriptor, StageError, StageOutcome},
    remote::{JobStatus, RemoteSessionFactory, TransferMethod, UpscaleJobConfig},
    runner::{ItemRunner, RetryConfig, RunnerConfig},
    testing::{
        fixtures::{fast_remote_config, mock_factory, write_pages},
        MockArchiver, MockComputeProvider, MockFileTransfer, MockJobClient, MockTask,
        MockTransform,
    },
    transform::CsvExporter,
    PipelineController, PipelineError,
};

fn runner() -> ItemRunner {
    ItemRunner::new(
        RunnerConfig::default()
            .with_max_workers(4)
            .with_retry(RetryConfig::no_retry()),
    )
}

fn completed(outcome: &StageOutcome) -> (usize, usize) {
    match outcome {
        StageOutcome::Completed { items, failed, .. } => (*items, *failed),
        StageOutcome::Skipped => panic!("stage was skipped"),
    }
}

/// Test harness for a three-stage local pipeline:
/// pages -> converted -> deskewed -> processed.csv
struct TestHarness {
    temp_dir: TempDir,
    convert: MockTransform,
    deskew: MockTransform,
}

impl TestHarness {
    fn new(pages: usize) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        write_pages(&temp_dir.path().join("pages"), pages, "png");
        Self {
            temp_dir,
            convert: MockTransform::new(),
            deskew: MockTransform::new(),
        }
    }

    fn path(&self, name: &str) -> std::path::PathBuf {
        self.temp_dir.path().join(name)
    }

    fn controller(&self) -> PipelineController {
        PipelineController::new(
            vec![
                StageDescriptor::local(
                    "convert",
                    self.path("pages"),
                    self.path("converted"),
                    LocalStage::new(Arc::new(self.convert.clone())),
                ),
                StageDescriptor::local(
                    "deskew",
                    self.path("converted"),
                    self.path("deskewed"),
                    LocalStage::new(Arc::new(self.deskew.clone())).with_workers(2),
                ),
                StageDescriptor::task(
                    "csv_export",
                    self.path("deskewed"),
                    self.path("processed.csv"),
                    Arc::new(CsvExporter::new()),
                ),
            ],
            runner(),
        )
    }
}

#[tokio::test]
async fn test_second_run_does_no_work() {
    let harness = TestHarness::new(4);

    let first = harness.controller().run().await.unwrap();
    assert_eq!(first.executed(), vec!["convert", "deskew", "csv_export"]);
    assert_eq!(harness.convert.processed().await.len(), 4);
    assert_eq!(harness.deskew.processed().await.len(), 4);

    let csv = std::fs::read_to_string(harness.path("processed.csv")).unwrap();
    assert!(csv.starts_with("Name,@images"));

    let second = harness.controller().run().await.unwrap();
    assert!(second.executed().is_empty());
    assert_eq!(second.skipped(), vec!["convert", "deskew", "csv_export"]);
    assert_eq!(harness.convert.processed().await.len(), 4);
    assert_eq!(harness.deskew.processed().await.len(), 4);
}

#[tokio::test]
async fn test_corrupt_page_is_dropped_and_stage_counts_as_done() {
    let harness = TestHarness::new(3);
    harness.convert.fail_on("0002.png").await;

    let report = harness.controller().run().await.unwrap();
    assert_eq!(completed(&report.stages[0].outcome), (2, 1));
    assert_eq!(report.item_failures(), 1);

    let converted = harness.path("converted");
    assert!(converted.is_dir());
    assert!(converted.join("0001.png").is_file());
    assert!(!converted.join("0002.png").exists());
    assert!(converted.join("0003.png").is_file());

    let rerun = harness.controller().run().await.unwrap();
    assert_eq!(rerun.stages[0].outcome, StageOutcome::Skipped);
    assert_eq!(harness.convert.processed().await.len(), 2);
}

#[tokio::test]
async fn test_missing_input_halts_run() {
    let temp_dir = TempDir::new().unwrap();
    let later = MockTask::new("later");
    let controller = PipelineController::new(
        vec![
            StageDescriptor::local(
                "convert",
                temp_dir.path().join("missing"),
                temp_dir.path().join("converted"),
                LocalStage::new(Arc::new(MockTransform::new())),
            ),
            StageDescriptor::task(
                "later",
                temp_dir.path().join("converted"),
                temp_dir.path().join("later"),
                Arc::new(later.clone()),
            ),
        ],
        runner(),
    );

    let err = controller.run().await.unwrap_err();
    assert_eq!(err.stage(), Some("convert"));
    assert!(matches!(
        err,
        PipelineError::StageFailed {
            source: StageError::MissingInput { .. },
            ..
        }
    ));
    assert!(!temp_dir.path().join("converted").exists());
    assert_eq!(later.run_count().await, 0);
}

#[tokio::test]
async fn test_rerun_resumes_after_failed_stage() {
    let temp_dir = TempDir::new().unwrap();
    let first = MockTask::new("extract");
    let second = MockTask::new("index");
    second.set_fail(true).await;

    let controller = PipelineController::new(
        vec![
            StageDescriptor::task(
                "extract",
                temp_dir.path(),
                temp_dir.path().join("book"),
                Arc::new(first.clone()),
            ),
            StageDescriptor::task(
                "index",
                temp_dir.path().join("book"),
                temp_dir.path().join("index"),
                Arc::new(second.clone()),
            ),
        ],
        runner(),
    );

    assert!(controller.run().await.is_err());
    second.set_fail(false).await;

    let report = controller.run().await.unwrap();
    assert_eq!(report.skipped(), vec!["extract"]);
    assert_eq!(report.executed(), vec!["index"]);
    assert_eq!(first.run_count().await, 1);
    assert_eq!(second.run_count().await, 2);
}

/// Mocks and a controller with a single remote stage.
struct RemoteHarness {
    temp_dir: TempDir,
    provider: MockComputeProvider,
    transfer: MockFileTransfer,
    jobs: MockJobClient,
    archiver: MockArchiver,
}

impl RemoteHarness {
    async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        write_pages(&temp_dir.path().join("content_page"), 2, "png");

        let archiver = MockArchiver::new();
        archiver.add_extracted_file("0001.png").await;
        archiver.add_extracted_file("0002.png").await;

        Self {
            temp_dir,
            provider: MockComputeProvider::new(),
            transfer: MockFileTransfer::new(),
            jobs: MockJobClient::new(),
            archiver,
        }
    }

    fn output(&self) -> std::path::PathBuf {
        self.temp_dir.path().join("content_page_upscaled")
    }

    fn factory(&self) -> RemoteSessionFactory {
        mock_factory(fast_remote_config(), &self.provider, &self.transfer, &self.jobs)
    }

    fn controller(&self) -> PipelineController {
        PipelineController::new(
            vec![StageDescriptor::remote(
                "remote_upscale",
                self.temp_dir.path().join("content_page"),
                self.output(),
                RemoteStage {
                    factory: Arc::new(self.factory()),
                    archiver: Arc::new(self.archiver.clone()),
                    instance_id: "pod-test".to_string(),
                    port: 5000,
                    transfer: TransferMethod::Relay,
                    job: UpscaleJobConfig::default(),
                },
            )],
            runner(),
        )
    }
}

fn hidden_entries(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| n.starts_with('.'))
        .collect()
}

#[tokio::test]
async fn test_remote_stage_unpacks_output_and_releases_instance() {
    let harness = RemoteHarness::new().await;
    harness
        .jobs
        .set_status_sequence(vec![JobStatus::Queued, JobStatus::Running, JobStatus::Completed])
        .await;

    let report = harness.controller().run().await.unwrap();
    assert_eq!(report.executed(), vec!["remote_upscale"]);

    assert!(harness.output().join("0001.png").is_file());
    assert_eq!(harness.provider.start_calls().await, vec!["pod-test"]);
    assert_eq!(harness.provider.stop_calls().await, vec!["pod-test"]);
    assert_eq!(harness.transfer.close_count().await, 1);

    let uploads = harness.transfer.uploads().await;
    assert_eq!(uploads.len(), 1);
    assert!(uploads[0].ends_with("content_page_batch.zip"));

    let requests = harness.jobs.requests().await;
    assert_eq!(requests[0].input_filename, "/workspace/content_page_batch.zip");
    assert!(hidden_entries(harness.temp_dir.path()).is_empty());
}

#[tokio::test]
async fn test_remote_job_error_leaves_output_absent() {
    let harness = RemoteHarness::new().await;
    harness.jobs.set_status_sequence(vec![JobStatus::Error]).await;
    harness.jobs.set_error_message("CUDA out of memory").await;

    let err = harness.controller().run().await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::StageFailed {
            source: StageError::JobFailed { .. },
            ..
        }
    ));

    assert!(!harness.output().exists());
    assert_eq!(harness.provider.stop_calls().await.len(), 1);
    assert!(harness.jobs.downloads().await.is_empty());
    assert!(hidden_entries(harness.temp_dir.path()).is_empty());
}

#[tokio::test]
async fn test_remote_upload_failure_still_releases_instance() {
    let harness = RemoteHarness::new().await;
    harness.transfer.set_fail_upload(true).await;

    assert!(harness.controller().run().await.is_err());
    assert_eq!(harness.provider.stop_calls().await.len(), 1);
    assert_eq!(harness.transfer.close_count().await, 1);
    assert!(harness.jobs.requests().await.is_empty());
}
