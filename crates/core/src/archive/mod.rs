//! Scan archive download, packing and extraction.
//!
//! Archives are fetched from an archive.org-style file server. Zip and tar
//! files are read and written in-process.

mod archiver;
mod config;
mod downloader;
mod error;

pub use archiver::{
    scratch_path, unpack_into, ArchiveFormat, Archiver, ExtractTask, FileArchiver,
};
pub use config::{ArchiveConfig, DownloadType};
pub use downloader::{ArchiveDownloader, DownloadTask};
pub use error::ArchiveError;
