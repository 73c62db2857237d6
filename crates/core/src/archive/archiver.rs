//! Packing and unpacking zip and tar archives.

use async_trait::async_trait;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::pipeline::{StageError, StageTask};

use super::error::ArchiveError;

/// Archive format, derived from the file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
}

impl ArchiveFormat {
    /// Detects the format of `path` from its extension.
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else {
            None
        }
    }
}

/// Packs directories into archives and unpacks them.
#[async_trait]
pub trait Archiver: Send + Sync {
    /// Returns the name of this archiver implementation.
    fn name(&self) -> &str;

    /// Extracts `archive` into `dest`, creating it if needed.
    async fn extract(&self, archive: &Path, dest: &Path) -> Result<(), ArchiveError>;

    /// Packs the contents of `source_dir` into a zip at `archive`.
    async fn pack(&self, source_dir: &Path, archive: &Path) -> Result<(), ArchiveError>;
}

/// Archiver reading and writing archives in-process.
///
/// The zip and tar readers are synchronous, so each call runs on the
/// blocking thread pool. Entries that would land outside the destination
/// are skipped by both readers.
#[derive(Debug, Clone, Default)]
pub struct FileArchiver;

impl FileArchiver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Archiver for FileArchiver {
    fn name(&self) -> &str {
        "file"
    }

    async fn extract(&self, archive: &Path, dest: &Path) -> Result<(), ArchiveError> {
        let format = ArchiveFormat::detect(archive).ok_or_else(|| ArchiveError::UnsupportedFormat {
            path: archive.to_path_buf(),
        })?;
        tokio::fs::create_dir_all(dest).await?;

        let (archive_path, dest_path) = (archive.to_path_buf(), dest.to_path_buf());
        tokio::task::spawn_blocking(move || extract_blocking(format, &archive_path, &dest_path))
            .await??;

        info!("Extracted {} to {}", archive.display(), dest.display());
        Ok(())
    }

    async fn pack(&self, source_dir: &Path, archive: &Path) -> Result<(), ArchiveError> {
        if let Some(parent) = archive.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let (source, target) = (source_dir.to_path_buf(), archive.to_path_buf());
        let entries = tokio::task::spawn_blocking(move || pack_blocking(&source, &target)).await??;

        info!(
            "Packed {} files from {} into {}",
            entries,
            source_dir.display(),
            archive.display()
        );
        Ok(())
    }
}

fn extract_blocking(format: ArchiveFormat, archive: &Path, dest: &Path) -> Result<(), ArchiveError> {
    let file = BufReader::new(File::open(archive)?);
    match format {
        ArchiveFormat::Zip => ZipArchive::new(file)?.extract(dest)?,
        ArchiveFormat::Tar => tar::Archive::new(file).unpack(dest)?,
        ArchiveFormat::TarGz => tar::Archive::new(GzDecoder::new(file)).unpack(dest)?,
    }
    Ok(())
}

/// Writes every file below `source_dir` into a new zip at `archive`, with
/// entry names relative to `source_dir`. Returns the number of files.
fn pack_blocking(source_dir: &Path, archive: &Path) -> Result<usize, ArchiveError> {
    let mut files = Vec::new();
    collect_files(source_dir, &mut files)?;
    files.sort();

    let mut writer = ZipWriter::new(BufWriter::new(File::create(archive)?));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);

    for path in &files {
        let relative = path.strip_prefix(source_dir).unwrap_or(path);
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        debug!("Adding {}", name);

        writer.start_file(name, options)?;
        let mut input = File::open(path)?;
        std::io::copy(&mut input, &mut writer)?;
    }

    writer.finish()?;
    Ok(files.len())
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

/// Hidden sibling directory that `output` is assembled in before it is
/// renamed into place.
pub fn scratch_path(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    output.with_file_name(format!(".{name}.partial"))
}

/// Extracts `archive` so that `output` appears all at once.
///
/// The archive is unpacked into a scratch directory next to `output`, which
/// is then renamed. A failed extraction leaves `output` absent.
pub async fn unpack_into(
    archiver: &dyn Archiver,
    archive: &Path,
    output: &Path,
) -> Result<(), ArchiveError> {
    let scratch = scratch_path(output);
    if scratch.exists() {
        warn!("Removing leftover scratch directory {}", scratch.display());
        tokio::fs::remove_dir_all(&scratch).await?;
    }

    if let Err(e) = archiver.extract(archive, &scratch).await {
        let _ = tokio::fs::remove_dir_all(&scratch).await;
        return Err(e);
    }

    tokio::fs::rename(&scratch, output).await?;
    Ok(())
}

/// Stage task that unpacks the first archive found among its candidates.
pub struct ExtractTask {
    archiver: Arc<dyn Archiver>,
    candidates: Vec<PathBuf>,
    remove_archive: bool,
}

impl ExtractTask {
    pub fn new(archiver: Arc<dyn Archiver>, candidates: Vec<PathBuf>) -> Self {
        Self {
            archiver,
            candidates,
            remove_archive: true,
        }
    }

    /// Whether to delete the archive after a successful extraction.
    pub fn with_remove_archive(mut self, remove: bool) -> Self {
        self.remove_archive = remove;
        self
    }
}

#[async_trait]
impl StageTask for ExtractTask {
    fn name(&self) -> &str {
        "extract"
    }

    async fn run(&self, _input: &Path, output: &Path) -> Result<(), StageError> {
        let archive = self
            .candidates
            .iter()
            .find(|p| p.is_file())
            .ok_or_else(|| ArchiveError::NotFound {
                tried: self.candidates.clone(),
            })?;

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        unpack_into(self.archiver.as_ref(), archive, output).await?;

        if self.remove_archive {
            tokio::fs::remove_file(archive).await?;
            info!("Removed {}", archive.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockArchiver;

    #[test]
    fn test_format_detection() {
        assert_eq!(ArchiveFormat::detect(Path::new("b_jp2.zip")), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::detect(Path::new("b.TAR")), Some(ArchiveFormat::Tar));
        assert_eq!(ArchiveFormat::detect(Path::new("b.tar.gz")), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::detect(Path::new("b.rar")), None);
    }

    #[test]
    fn test_scratch_path_is_hidden_sibling() {
        assert_eq!(
            scratch_path(Path::new("/books/Title")),
            PathBuf::from("/books/.Title.partial")
        );
    }

    #[tokio::test]
    async fn test_unsupported_format() {
        let err = FileArchiver::new()
            .extract(Path::new("/tmp/book.rar"), Path::new("/tmp/out"))
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::UnsupportedFormat { .. }));
    }

    #[tokio::test]
    async fn test_pack_then_extract_keeps_relative_layout() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("content_page");
        std::fs::create_dir_all(source.join("nested")).unwrap();
        std::fs::write(source.join("0001.png"), b"one").unwrap();
        std::fs::write(source.join("nested/0002.png"), b"two").unwrap();
        let archive = temp.path().join("work/content_page_batch.zip");

        let archiver = FileArchiver::new();
        archiver.pack(&source, &archive).await.unwrap();
        let dest = temp.path().join("unpacked");
        archiver.extract(&archive, &dest).await.unwrap();

        assert_eq!(std::fs::read(dest.join("0001.png")).unwrap(), b"one");
        assert_eq!(std::fs::read(dest.join("nested/0002.png")).unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_extract_tar() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("b_orig_jp2.tar");
        {
            let mut builder = tar::Builder::new(File::create(&archive).unwrap());
            let data = b"jp2 bytes";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, "b_orig_jp2/0001.jp2", &data[..])
                .unwrap();
            builder.finish().unwrap();
        }

        let dest = temp.path().join("Title");
        FileArchiver::new().extract(&archive, &dest).await.unwrap();
        assert!(dest.join("b_orig_jp2/0001.jp2").is_file());
    }

    #[tokio::test]
    async fn test_corrupt_zip_through_unpack_into_leaves_no_output() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("b_jp2.zip");
        std::fs::write(&archive, b"not a zip").unwrap();
        let output = temp.path().join("Title");

        let err = unpack_into(&FileArchiver::new(), &archive, &output)
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Zip(_)));
        assert!(!output.exists());
        assert!(!scratch_path(&output).exists());
    }

    #[tokio::test]
    async fn test_extract_task_renames_and_removes_archive() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("b_jp2.zip");
        std::fs::write(&archive, b"zip").unwrap();
        let output = temp.path().join("Title");

        let archiver = MockArchiver::new();
        archiver.add_extracted_file("b_jp2/0001.jp2").await;
        let task = ExtractTask::new(
            Arc::new(archiver.clone()),
            vec![temp.path().join("b_orig_jp2.tar"), archive.clone()],
        );

        task.run(temp.path(), &output).await.unwrap();

        assert!(output.join("b_jp2/0001.jp2").is_file());
        assert!(!archive.exists());
        assert!(!scratch_path(&output).exists());
        assert_eq!(archiver.extract_calls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_extraction_leaves_no_output() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("b_jp2.zip");
        std::fs::write(&archive, b"zip").unwrap();
        let output = temp.path().join("Title");

        let archiver = MockArchiver::new();
        archiver.set_fail_extract(true).await;
        let task = ExtractTask::new(Arc::new(archiver), vec![archive.clone()]);

        assert!(task.run(temp.path(), &output).await.is_err());
        assert!(!output.exists());
        assert!(!scratch_path(&output).exists());
        assert!(archive.exists());
    }

    #[tokio::test]
    async fn test_missing_archive() {
        let temp = tempfile::tempdir().unwrap();
        let task = ExtractTask::new(
            Arc::new(MockArchiver::new()),
            vec![temp.path().join("b_jp2.zip")],
        );

        let err = task.run(temp.path(), &temp.path().join("Title")).await.unwrap_err();
        assert!(matches!(err, StageError::Archive(ArchiveError::NotFound { .. })));
    }
}
