//! Resumable stage pipeline.
//!
//! A [`PipelineController`] runs [`StageDescriptor`]s in order and skips
//! every stage whose output already exists, so an interrupted run picks up
//! at the first unfinished stage. Stages are per-file transforms run through
//! the item runner, remote jobs run on a leased instance, or single-shot
//! tasks.

mod book;
mod controller;
mod error;
mod remote_stage;
mod types;

pub use book::{book_pipeline, book_stages, BookComponents, BookLayout};
pub use controller::PipelineController;
pub use error::{PipelineError, StageError};
pub use types::{
    LocalStage, PipelineReport, RemoteStage, SkipPredicate, StageDescriptor, StageOperation,
    StageOutcome, StageReport, StageTask,
};
