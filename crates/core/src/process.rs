//! Running external command-line tools.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::debug;

use crate::runner::ItemError;

/// Failure of an external tool invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The binary does not exist.
    #[error("Tool not found: {path}")]
    NotFound { path: PathBuf },

    /// The tool ran but exited unsuccessfully.
    #[error("{program} exited with code {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The tool did not finish in time and was killed.
    #[error("{program} timed out after {timeout_secs} seconds")]
    Timeout { program: String, timeout_secs: u64 },

    /// Spawning or waiting on the tool failed.
    #[error("I/O error running tool: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    /// Whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<ToolError> for ItemError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::NotFound { path } => ItemError::ToolNotFound { path },
            ToolError::Io(e) => ItemError::Io(e),
            e @ ToolError::Timeout { .. } => ItemError::transient(e.to_string()),
            e @ ToolError::Failed { .. } => ItemError::permanent(e.to_string()),
        }
    }
}

/// Runs `program` with `args` and waits for it, capturing its output.
///
/// A non-zero exit status is returned as [`ToolError::Failed`] with the
/// trimmed stderr. When `timeout_secs` elapses first the child is killed.
pub async fn run_tool(
    program: &Path,
    args: &[String],
    timeout_secs: u64,
) -> Result<Output, ToolError> {
    run_tool_in(program, args, None, timeout_secs).await
}

/// Like [`run_tool`], with the working directory set to `cwd`.
pub async fn run_tool_in(
    program: &Path,
    args: &[String],
    cwd: Option<&Path>,
    timeout_secs: u64,
) -> Result<Output, ToolError> {
    let name = program.to_string_lossy().to_string();
    debug!("Running {} {}", name, args.join(" "));

    let mut command = Command::new(program);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let child = command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ToolError::NotFound {
                    path: program.to_path_buf(),
                }
            } else {
                ToolError::Io(e)
            }
        })?;

    // Dropping the wait future on timeout kills the child.
    let output = timeout(Duration::from_secs(timeout_secs), child.wait_with_output())
        .await
        .map_err(|_| ToolError::Timeout {
            program: name.clone(),
            timeout_secs,
        })??;

    if !output.status.success() {
        return Err(ToolError::Failed {
            program: name,
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_successful_tool_output() {
        let output = run_tool(Path::new("sh"), &sh("echo hello"), 10).await.unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let err = run_tool(Path::new("sh"), &sh("echo broken >&2; exit 3"), 10)
            .await
            .unwrap_err();

        match err {
            ToolError::Failed { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let err = run_tool(Path::new("/nonexistent/tool"), &[], 10)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_working_directory() {
        let temp = tempfile::tempdir().unwrap();
        let output = run_tool_in(Path::new("sh"), &sh("pwd"), Some(temp.path()), 10)
            .await
            .unwrap();
        let printed = String::from_utf8_lossy(&output.stdout).trim().to_string();
        assert_eq!(
            std::fs::canonicalize(printed).unwrap(),
            std::fs::canonicalize(temp.path()).unwrap()
        );
    }

    #[test]
    fn test_item_error_mapping() {
        let timeout = ItemError::from(ToolError::Timeout {
            program: "magick".into(),
            timeout_secs: 5,
        });
        assert!(timeout.is_retryable());

        let failed = ItemError::from(ToolError::Failed {
            program: "magick".into(),
            code: Some(1),
            stderr: "corrupt image".into(),
        });
        assert!(!failed.is_retryable());
        assert!(failed.to_string().contains("corrupt image"));
    }

    #[tokio::test]
    async fn test_timeout_kills_tool() {
        let err = run_tool(Path::new("sh"), &sh("sleep 5"), 1).await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout { timeout_secs: 1, .. }));
        assert!(err.is_retryable());
    }
}
