//! Remote offload of a whole directory.

use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::archive::unpack_into;
use crate::remote::JobStatus;

use super::error::StageError;
use super::types::RemoteStage;

/// Work directory next to `output` holding the upload package and the
/// downloaded result.
fn work_dir(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    output.with_file_name(format!(".{name}.remote"))
}

/// Packs `input`, processes it remotely and unpacks the result as `output`.
///
/// The session is torn down before this returns, on every path. When the
/// job ends in error, `output` is left absent.
pub(crate) async fn run_remote_stage(
    stage: &RemoteStage,
    input: &Path,
    output: &Path,
) -> Result<(), StageError> {
    if !input.is_dir() {
        return Err(StageError::MissingInput {
            path: input.to_path_buf(),
        });
    }

    let work = work_dir(output);
    tokio::fs::create_dir_all(&work).await?;

    let result = offload(stage, input, output, &work).await;
    if let Err(e) = tokio::fs::remove_dir_all(&work).await {
        warn!("Failed to remove {}: {}", work.display(), e);
    }
    result
}

async fn offload(
    stage: &RemoteStage,
    input: &Path,
    output: &Path,
    work: &Path,
) -> Result<(), StageError> {
    let input_name = input
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "input".to_string());
    let package = work.join(format!("{input_name}_batch.zip"));
    let downloaded = work.join("output.zip");

    stage.archiver.pack(input, &package).await?;

    let session = stage
        .factory
        .create_session(&stage.instance_id, stage.port, stage.transfer)
        .await?;

    let package_ref = &package;
    let downloaded_ref = &downloaded;
    session
        .scoped(|s| async move {
            let reference = s.upload(package_ref).await?;
            let request = stage.job.build_request(&reference).await?;
            let job_id = s.submit_job(&request).await?;
            let record = s.poll_until_terminal(&job_id).await?;

            if record.status != JobStatus::Completed {
                let message = record.error.unwrap_or_else(|| "no error message".to_string());
                error!("Remote job {} failed: {}", job_id, message);
                return Err(StageError::JobFailed { job_id, message });
            }

            let url = record
                .output_url
                .ok_or_else(|| StageError::MissingOutput {
                    job_id: job_id.clone(),
                })?;
            s.download(&url, downloaded_ref).await?;
            Ok::<(), StageError>(())
        })
        .await?;

    unpack_into(stage.archiver.as_ref(), &downloaded, output).await?;
    info!("Remote output unpacked into {}", output.display());
    Ok(())
}
