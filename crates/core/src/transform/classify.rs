//! Page classification and sorting by label.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::runner::{ItemError, ItemOperation, WorkItem};

use super::config::ClassifierConfig;

/// Kind of a scanned page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    BlankPage,
    ContentPage,
    TitlePage,
}

impl PageType {
    /// Label as used in directory names and classifier responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BlankPage => "blank_page",
            Self::ContentPage => "content_page",
            Self::TitlePage => "title_page",
        }
    }

    /// Parses a classifier label.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "blank_page" => Some(Self::BlankPage),
            "content_page" => Some(Self::ContentPage),
            "title_page" => Some(Self::TitlePage),
            _ => None,
        }
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Assigns a page type to an image.
#[async_trait]
pub trait PageClassifier: Send + Sync {
    /// Returns the name of this classifier implementation.
    fn name(&self) -> &str;

    /// Classifies the image at `image`.
    async fn classify(&self, image: &Path) -> Result<PageType, ItemError>;
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    label: String,
}

/// Classifier calling an HTTP endpoint with the raw image bytes.
pub struct HttpPageClassifier {
    endpoint: String,
    labels: Vec<PageType>,
    client: Client,
}

impl HttpPageClassifier {
    /// Creates a classifier.
    pub fn new(config: &ClassifierConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            labels: config.labels.clone(),
            client,
        })
    }
}

#[async_trait]
impl PageClassifier for HttpPageClassifier {
    fn name(&self) -> &str {
        "http"
    }

    async fn classify(&self, image: &Path) -> Result<PageType, ItemError> {
        let bytes = tokio::fs::read(image).await?;

        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await?
            .error_for_status()?;

        let body: ClassifyResponse = response.json().await?;
        let page_type = PageType::from_label(&body.label)
            .ok_or_else(|| ItemError::permanent(format!("unknown page label '{}'", body.label)))?;

        if !self.labels.contains(&page_type) {
            return Err(ItemError::permanent(format!(
                "page label '{}' is not enabled",
                page_type
            )));
        }
        Ok(page_type)
    }
}

/// Copies each page into a subdirectory named after its label.
///
/// An item with destination `sorted/0001.png` labelled `content_page` ends
/// up at `sorted/content_page/0001.png`. Sources are left in place.
///
/// Every enabled label directory is created before the first page is
/// sorted, so a label with no pages still has an (empty) directory.
pub struct SortOperation {
    classifier: Arc<dyn PageClassifier>,
    labels: Vec<PageType>,
}

impl SortOperation {
    pub fn new(classifier: Arc<dyn PageClassifier>) -> Self {
        Self {
            classifier,
            labels: vec![PageType::BlankPage, PageType::ContentPage, PageType::TitlePage],
        }
    }

    /// Restricts the label directories created up front.
    pub fn with_labels(mut self, labels: &[PageType]) -> Self {
        self.labels = labels.to_vec();
        self
    }

    /// Destination of a page with `page_type` for an item destination.
    pub fn sorted_path(destination: &Path, page_type: PageType) -> PathBuf {
        let file_name = destination.file_name().unwrap_or_default();
        destination
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(page_type.as_str())
            .join(file_name)
    }
}

#[async_trait]
impl ItemOperation for SortOperation {
    fn name(&self) -> &str {
        "sort"
    }

    async fn run(&self, item: &WorkItem) -> Result<PathBuf, ItemError> {
        let input = item.require_file()?;
        if !input.is_file() {
            return Err(ItemError::InputNotFound {
                path: input.to_path_buf(),
            });
        }

        let page_type = self.classifier.classify(input).await?;
        let target = Self::sorted_path(&item.destination, page_type);
        if let Some(dir) = target.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::copy(input, &target).await?;

        debug!("{} classified as {}", item.id, page_type);
        Ok(target)
    }

    async fn prepare(&self, output_dir: &Path) -> Result<(), ItemError> {
        for label in &self.labels {
            tokio::fs::create_dir_all(output_dir.join(label.as_str())).await?;
        }
        Ok(())
    }
}
