//! Per-file transform backed by an external command.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::process::run_tool;
use crate::runner::{ItemError, ItemOperation, WorkItem};

use super::config::CommandSpec;

/// Runs a configured command for every item.
///
/// The output lands at the item destination, with its extension replaced
/// when the command declares one.
pub struct CommandTransform {
    name: String,
    spec: CommandSpec,
    timeout_secs: u64,
}

impl CommandTransform {
    pub fn new(name: impl Into<String>, spec: CommandSpec, timeout_secs: u64) -> Self {
        Self {
            name: name.into(),
            spec,
            timeout_secs,
        }
    }

    /// Where the output for `destination` is written.
    pub fn output_path(&self, destination: &Path) -> PathBuf {
        match &self.spec.output_extension {
            Some(ext) => destination.with_extension(ext),
            None => destination.to_path_buf(),
        }
    }
}

#[async_trait]
impl ItemOperation for CommandTransform {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, item: &WorkItem) -> Result<PathBuf, ItemError> {
        let input = item.require_file()?;
        if !input.is_file() {
            return Err(ItemError::InputNotFound {
                path: input.to_path_buf(),
            });
        }

        let output = self.output_path(&item.destination);
        let args = self.spec.render_args(input, &output);
        run_tool(&self.spec.program, &args, self.timeout_secs).await?;

        if !output.exists() {
            return Err(ItemError::permanent(format!(
                "{} produced no output for {}",
                self.name, item.id
            )));
        }

        debug!("{}: {} -> {}", self.name, input.display(), output.display());
        Ok(output)
    }
}
