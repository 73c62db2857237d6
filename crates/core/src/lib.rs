//! Resumable processing pipeline for scanned books.
//!
//! Downloads a scan archive, runs local page transforms through a bounded
//! worker pool, optionally offloads upscaling to a leased GPU instance and
//! exports the final page index. Every stage is skipped when its output
//! already exists.

pub mod archive;
pub mod config;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod remote;
pub mod runner;
pub mod testing;
pub mod transform;

pub use archive::{ArchiveConfig, ArchiveDownloader, ArchiveError, DownloadType};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use pipeline::{
    book_pipeline, BookLayout, PipelineController, PipelineError, PipelineReport,
    StageDescriptor, StageError, StageOutcome,
};
pub use progress::{ProgressHandle, ProgressMeter, ProgressTracker};
pub use remote::{RemoteConfig, RemoteError, RemoteSession, RemoteSessionFactory, TransferMethod};
pub use runner::{BatchReport, ItemError, ItemOperation, ItemRunner, RunnerConfig, WorkItem};
