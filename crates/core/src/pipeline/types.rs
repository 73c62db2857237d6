//! Types for the pipeline module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::archive::Archiver;
use crate::remote::{RemoteSessionFactory, TransferMethod, UpscaleJobConfig};
use crate::runner::ItemOperation;

use super::error::StageError;

/// A single-shot stage body (download, extract, export).
#[async_trait]
pub trait StageTask: Send + Sync {
    /// Returns the name of the task.
    fn name(&self) -> &str;

    /// Runs the task, producing `output` from `input`.
    async fn run(&self, input: &Path, output: &Path) -> Result<(), StageError>;
}

/// Decides whether a stage has already been done.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SkipPredicate {
    /// Skip when the stage output exists.
    #[default]
    OutputExists,
    /// Skip when any of these paths exists.
    AnyExists(Vec<PathBuf>),
    /// Always run.
    Never,
}

impl SkipPredicate {
    /// Whether the stage producing `output` can be skipped.
    pub fn is_satisfied(&self, output: &Path) -> bool {
        match self {
            Self::OutputExists => output.exists(),
            Self::AnyExists(paths) => paths.iter().any(|p| p.exists()),
            Self::Never => false,
        }
    }
}

/// A per-file transform run through the item runner.
#[derive(Clone)]
pub struct LocalStage {
    /// Operation applied to every input file.
    pub operation: Arc<dyn ItemOperation>,
    /// Lowercase extensions (without dot) to include; empty means all files.
    pub extensions: Vec<String>,
    /// Worker bound for this stage, overriding the runner default.
    pub workers: Option<usize>,
}

impl LocalStage {
    /// Creates a stage over every file of the input directory.
    pub fn new(operation: Arc<dyn ItemOperation>) -> Self {
        Self {
            operation,
            extensions: Vec::new(),
            workers: None,
        }
    }

    /// Overrides the worker bound.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Restricts the stage to files with one of `extensions`.
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
            .collect();
        self
    }

    /// Whether `path` passes the extension filter.
    pub fn accepts(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .is_some_and(|e| self.extensions.iter().any(|x| *x == e))
    }
}

/// The input directory is packaged, processed on a leased remote instance,
/// and the result unpacked into the stage output.
#[derive(Clone)]
pub struct RemoteStage {
    /// Provisions the session.
    pub factory: Arc<RemoteSessionFactory>,
    /// Packs the input and unpacks the result.
    pub archiver: Arc<dyn Archiver>,
    /// Instance to lease.
    pub instance_id: String,
    /// Port of the job server on the instance.
    pub port: u16,
    /// How the package reaches the instance.
    pub transfer: TransferMethod,
    /// Job parameters.
    pub job: UpscaleJobConfig,
}

/// What a stage does when it runs.
#[derive(Clone)]
pub enum StageOperation {
    /// Per-file transform over the input directory.
    Local(LocalStage),
    /// Offloaded to a remote instance.
    Remote(RemoteStage),
    /// Single-shot task.
    Task(Arc<dyn StageTask>),
}

impl StageOperation {
    /// Short kind name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::Remote(_) => "remote",
            Self::Task(_) => "task",
        }
    }
}

impl fmt::Debug for StageOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(stage) => f
                .debug_struct("Local")
                .field("operation", &stage.operation.name())
                .field("extensions", &stage.extensions)
                .finish(),
            Self::Remote(stage) => f
                .debug_struct("Remote")
                .field("instance_id", &stage.instance_id)
                .field("port", &stage.port)
                .field("transfer", &stage.transfer)
                .finish(),
            Self::Task(task) => f.debug_tuple("Task").field(&task.name()).finish(),
        }
    }
}

/// One named step of a pipeline. Built once per run.
#[derive(Debug, Clone)]
pub struct StageDescriptor {
    pub name: String,
    pub input: PathBuf,
    pub output: PathBuf,
    pub skip: SkipPredicate,
    pub operation: StageOperation,
}

impl StageDescriptor {
    fn new(
        name: impl Into<String>,
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        operation: StageOperation,
    ) -> Self {
        Self {
            name: name.into(),
            input: input.into(),
            output: output.into(),
            skip: SkipPredicate::OutputExists,
            operation,
        }
    }

    /// Creates a per-file stage.
    pub fn local(
        name: impl Into<String>,
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        stage: LocalStage,
    ) -> Self {
        Self::new(name, input, output, StageOperation::Local(stage))
    }

    /// Creates a remote stage.
    pub fn remote(
        name: impl Into<String>,
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        stage: RemoteStage,
    ) -> Self {
        Self::new(name, input, output, StageOperation::Remote(stage))
    }

    /// Creates a single-shot stage.
    pub fn task(
        name: impl Into<String>,
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        task: Arc<dyn StageTask>,
    ) -> Self {
        Self::new(name, input, output, StageOperation::Task(task))
    }

    /// Replaces the skip predicate.
    pub fn with_skip(mut self, skip: SkipPredicate) -> Self {
        self.skip = skip;
        self
    }

    /// Whether the stage has already been done.
    pub fn is_done(&self) -> bool {
        self.skip.is_satisfied(&self.output)
    }
}

/// How a stage ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    /// Output already existed.
    Skipped,
    /// The stage ran. `failed` counts items dropped by a local stage.
    Completed {
        items: usize,
        failed: usize,
        duration_ms: u64,
    },
}

/// Outcome of one stage in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub name: String,
    pub outcome: StageOutcome,
}

/// Result of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Identifier of the run.
    pub run_id: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Stages in execution order.
    pub stages: Vec<StageReport>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl PipelineReport {
    /// Names of stages that ran.
    pub fn executed(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|s| matches!(s.outcome, StageOutcome::Completed { .. }))
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Names of stages that were skipped.
    pub fn skipped(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|s| s.outcome == StageOutcome::Skipped)
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Items dropped across all stages.
    pub fn item_failures(&self) -> usize {
        self.stages
            .iter()
            .map(|s| match s.outcome {
                StageOutcome::Completed { failed, .. } => failed,
                StageOutcome::Skipped => 0,
            })
            .sum()
    }
}
