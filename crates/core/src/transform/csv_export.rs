//! CSV index of the final images.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::pipeline::{StageError, StageTask};

/// Extensions recognized as images.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff", "bmp"];

/// Writes a `Name,@images` CSV listing every image of a directory, sorted
/// by file name, with the image path in the second column.
#[derive(Debug, Default)]
pub struct CsvExporter;

impl CsvExporter {
    pub fn new() -> Self {
        Self
    }

    /// Image files directly inside `dir`, sorted by path.
    pub fn find_images(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut images = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.as_str()));
            if path.is_file() && is_image {
                images.push(path);
            }
        }
        images.sort();
        Ok(images)
    }

    /// Renders the CSV document.
    pub fn render(images: &[PathBuf]) -> String {
        let mut csv = String::from("Name,@images\n");
        for path in images {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            csv.push_str(&escape_field(&name));
            csv.push(',');
            csv.push_str(&escape_field(&path.to_string_lossy()));
            csv.push('\n');
        }
        csv
    }
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[async_trait]
impl StageTask for CsvExporter {
    fn name(&self) -> &str {
        "csv_export"
    }

    async fn run(&self, input: &Path, output: &Path) -> Result<(), StageError> {
        if !input.is_dir() {
            return Err(StageError::MissingInput {
                path: input.to_path_buf(),
            });
        }

        let images = Self::find_images(input)?;
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let partial = output.with_extension("csv.part");
        tokio::fs::write(&partial, Self::render(&images)).await?;
        tokio::fs::rename(&partial, output).await?;

        info!("Wrote {} rows to {}", images.len(), output.display());
        Ok(())
    }
}
