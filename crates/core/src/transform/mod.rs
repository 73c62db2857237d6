//! Local page transforms.
//!
//! Image processing itself is delegated to external commands; this module
//! wires them into the item runner, sorts pages by classifier label and
//! exports the final CSV index.

mod classify;
mod command;
mod config;
mod csv_export;

pub use classify::{HttpPageClassifier, PageClassifier, PageType, SortOperation};
pub use command::CommandTransform;
pub use config::{
    ClassifierConfig, CommandSpec, TransformsConfig, INPUT_PLACEHOLDER, OUTPUT_PLACEHOLDER,
};
pub use csv_export::{CsvExporter, IMAGE_EXTENSIONS};
