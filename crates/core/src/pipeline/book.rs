//! The book pipeline: stage layout over a book's working directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::archive::{ArchiveDownloader, Archiver, DownloadTask, ExtractTask, FileArchiver};
use crate::config::Config;
use crate::progress::ProgressTracker;
use crate::remote::RemoteSessionFactory;
use crate::runner::ItemRunner;
use crate::transform::{
    CommandTransform, CsvExporter, HttpPageClassifier, PageClassifier, PageType, SortOperation,
};

use super::controller::PipelineController;
use super::error::PipelineError;
use super::types::{LocalStage, RemoteStage, SkipPredicate, StageDescriptor};

/// Directories of one book under the projects path.
///
/// ```text
/// projects/
///   {id}_jp2.zip                   downloaded archive (removed after extract)
///   {title}/
///     {id}_jp2/                    extracted pages
///     out/                         converted PNGs
///     deskewed/
///     sorted/{label}/              pages by classifier label
///     sorted/content_page_upscaled/
///     processed/out.csv
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookLayout {
    projects: PathBuf,
    book_dir: PathBuf,
    identifier: String,
}

impl BookLayout {
    pub fn new(projects: impl Into<PathBuf>, identifier: &str, title: &str) -> Self {
        let projects = projects.into();
        Self {
            book_dir: projects.join(title),
            projects,
            identifier: identifier.to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.layout.projects_path,
            &config.book.identifier,
            config.book.title(),
        )
    }

    pub fn projects(&self) -> &Path {
        &self.projects
    }

    pub fn book_dir(&self) -> &Path {
        &self.book_dir
    }

    /// Pages as extracted from the archive.
    pub fn images(&self) -> PathBuf {
        self.book_dir.join(format!("{}_jp2", self.identifier))
    }

    pub fn converted(&self) -> PathBuf {
        self.book_dir.join("out")
    }

    pub fn deskewed(&self) -> PathBuf {
        self.book_dir.join("deskewed")
    }

    pub fn sorted(&self) -> PathBuf {
        self.book_dir.join("sorted")
    }

    pub fn content(&self) -> PathBuf {
        self.sorted().join(PageType::ContentPage.as_str())
    }

    pub fn upscaled(&self) -> PathBuf {
        self.sorted()
            .join(format!("{}_upscaled", PageType::ContentPage.as_str()))
    }

    pub fn processed(&self) -> PathBuf {
        self.book_dir.join("processed")
    }

    pub fn csv(&self) -> PathBuf {
        self.processed().join("out.csv")
    }
}

/// Collaborators the book stages are built from.
#[derive(Clone)]
pub struct BookComponents {
    pub downloader: Arc<ArchiveDownloader>,
    pub archiver: Arc<dyn Archiver>,
    pub classifier: Arc<dyn PageClassifier>,
    /// Present when the remote upscale stage is part of the pipeline.
    pub remote: Option<Arc<RemoteSessionFactory>>,
}

impl BookComponents {
    /// Builds the production components. The remote factory is only built
    /// when `[remote]` is enabled.
    pub fn from_config(config: &Config, progress: &ProgressTracker) -> Result<Self, PipelineError> {
        let downloader = ArchiveDownloader::new(config.archive.clone(), progress.clone())
            .map_err(|e| PipelineError::setup("archive downloader", e))?;
        let classifier = HttpPageClassifier::new(&config.classifier)
            .map_err(|e| PipelineError::setup("page classifier", e))?;

        let remote = if config.remote.enabled {
            let factory = RemoteSessionFactory::runpod(config.remote.clone(), progress.clone())
                .map_err(|e| PipelineError::setup("remote session factory", e))?;
            Some(Arc::new(factory))
        } else {
            None
        };

        Ok(Self {
            downloader: Arc::new(downloader),
            archiver: Arc::new(FileArchiver::new()),
            classifier: Arc::new(classifier),
            remote,
        })
    }

    pub fn with_archiver(mut self, archiver: Arc<dyn Archiver>) -> Self {
        self.archiver = archiver;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn PageClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_remote(mut self, factory: Option<Arc<RemoteSessionFactory>>) -> Self {
        self.remote = factory;
        self
    }
}

/// Stages of the book pipeline, in order.
///
/// download, extract, convert, deskew, sort, remote_upscale (only with a
/// remote factory), threshold, csv_export. Without the remote stage the
/// threshold stage reads the sorted content pages directly.
pub fn book_stages(config: &Config, components: &BookComponents) -> Vec<StageDescriptor> {
    let layout = BookLayout::from_config(config);
    let identifier = &config.book.identifier;
    let transforms = &config.transforms;
    let candidates = components
        .downloader
        .candidate_paths(layout.projects(), identifier);

    let mut download_markers = candidates.clone();
    download_markers.push(layout.book_dir().to_path_buf());

    let mut stages = vec![
        StageDescriptor::task(
            "download",
            layout.projects(),
            candidates[0].clone(),
            Arc::new(DownloadTask::new(
                Arc::clone(&components.downloader),
                identifier.clone(),
            )),
        )
        .with_skip(SkipPredicate::AnyExists(download_markers)),
        StageDescriptor::task(
            "extract",
            layout.projects(),
            layout.book_dir(),
            Arc::new(
                ExtractTask::new(Arc::clone(&components.archiver), candidates)
                    .with_remove_archive(config.archive.remove_after_extract),
            ),
        ),
        StageDescriptor::local(
            "convert",
            layout.images(),
            layout.converted(),
            LocalStage::new(Arc::new(CommandTransform::new(
                "convert",
                transforms.convert.clone(),
                transforms.timeout_secs,
            )))
            .with_extensions(&transforms.convert_extensions),
        ),
        StageDescriptor::local(
            "deskew",
            layout.converted(),
            layout.deskewed(),
            LocalStage::new(Arc::new(CommandTransform::new(
                "deskew",
                transforms.deskew.clone(),
                transforms.timeout_secs,
            ))),
        ),
        StageDescriptor::local(
            "sort",
            layout.deskewed(),
            layout.sorted(),
            LocalStage::new(Arc::new(
                SortOperation::new(Arc::clone(&components.classifier))
                    .with_labels(&config.classifier.labels),
            ))
            .with_workers(config.classifier.max_workers),
        ),
    ];

    let threshold_input = match &components.remote {
        Some(factory) => {
            stages.push(StageDescriptor::remote(
                "remote_upscale",
                layout.content(),
                layout.upscaled(),
                RemoteStage {
                    factory: Arc::clone(factory),
                    archiver: Arc::clone(&components.archiver),
                    instance_id: config.remote.instance_id.clone(),
                    port: config.remote.port,
                    transfer: config.remote.transfer,
                    job: config.remote.job.clone(),
                },
            ));
            layout.upscaled()
        }
        None => layout.content(),
    };

    stages.push(StageDescriptor::local(
        "threshold",
        threshold_input,
        layout.processed(),
        LocalStage::new(Arc::new(CommandTransform::new(
            "threshold",
            transforms.threshold.clone(),
            transforms.timeout_secs,
        ))),
    ));
    stages.push(StageDescriptor::task(
        "csv_export",
        layout.processed(),
        layout.csv(),
        Arc::new(CsvExporter::new()),
    ));

    stages
}

/// Builds the controller for the configured book.
pub fn book_pipeline(
    config: &Config,
    progress: &ProgressTracker,
) -> Result<PipelineController, PipelineError> {
    let components = BookComponents::from_config(config, progress)?;
    let stages = book_stages(config, &components);
    info!(
        "Book pipeline for {} with {} stages",
        config.book.identifier,
        stages.len()
    );

    let runner = ItemRunner::new(config.runner.clone()).with_progress(progress.clone());
    Ok(PipelineController::new(stages, runner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;
    use crate::remote::RemoteConfig;
    use crate::testing::{MockArchiver, MockClassifier, MockComputeProvider};

    fn config(projects: &Path) -> Config {
        load_config_from_str(&format!(
            "[book]\nidentifier = \"hume01\"\ntitle = \"History\"\n\n[layout]\nprojects_path = \"{}\"\n",
            projects.display()
        ))
        .unwrap()
    }

    fn components(config: &Config) -> BookComponents {
        BookComponents::from_config(config, &ProgressTracker::new())
            .unwrap()
            .with_archiver(Arc::new(MockArchiver::new()))
            .with_classifier(Arc::new(MockClassifier::new(PageType::ContentPage)))
    }

    fn names(stages: &[StageDescriptor]) -> Vec<&str> {
        stages.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn test_layout_paths() {
        let layout = BookLayout::new("/p", "hume01", "History");
        assert_eq!(layout.book_dir(), Path::new("/p/History"));
        assert_eq!(layout.images(), PathBuf::from("/p/History/hume01_jp2"));
        assert_eq!(layout.content(), PathBuf::from("/p/History/sorted/content_page"));
        assert_eq!(
            layout.upscaled(),
            PathBuf::from("/p/History/sorted/content_page_upscaled")
        );
        assert_eq!(layout.csv(), PathBuf::from("/p/History/processed/out.csv"));
    }

    #[test]
    fn test_stages_without_remote() {
        let temp = tempfile::tempdir().unwrap();
        let config = config(temp.path());
        let stages = book_stages(&config, &components(&config));

        assert_eq!(
            names(&stages),
            vec!["download", "extract", "convert", "deskew", "sort", "threshold", "csv_export"]
        );
        let threshold = &stages[5];
        assert_eq!(threshold.input, temp.path().join("History/sorted/content_page"));
    }

    #[test]
    fn test_stages_with_remote() {
        let temp = tempfile::tempdir().unwrap();
        let config = config(temp.path());
        let factory = RemoteSessionFactory::new(
            RemoteConfig::default(),
            Arc::new(MockComputeProvider::new()),
        );
        let stages = book_stages(
            &config,
            &components(&config).with_remote(Some(Arc::new(factory))),
        );

        assert_eq!(stages[5].name, "remote_upscale");
        assert_eq!(stages[5].operation.kind(), "remote");
        assert_eq!(
            stages[6].input,
            temp.path().join("History/sorted/content_page_upscaled")
        );
    }

    #[test]
    fn test_download_skipped_once_book_dir_exists() {
        let temp = tempfile::tempdir().unwrap();
        let config = config(temp.path());
        let stages = book_stages(&config, &components(&config));

        assert!(!stages[0].is_done());
        std::fs::create_dir_all(temp.path().join("History")).unwrap();
        assert!(stages[0].is_done());
        assert!(stages[1].is_done());
        assert!(!stages[2].is_done());
    }
}
