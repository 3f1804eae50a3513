//! Job runners.
//!
//! Each runner takes a [`JobContext`] and the job's payload DTO and either
//! leaves its outputs on disk or returns a [`JobError`]. Status changes are
//! published, never written directly.

use std::path::Path;

use brainns_docker::logs::drain_to_file;
use brainns_docker::{ContainerSpec, ExitOutcome, RuntimeError, StagingArchive};
use bytes::Bytes;

use crate::context::JobContext;
use crate::error::JobError;

pub mod prediction;
pub mod preprocessing;

pub use prediction::run_prediction_job;
pub use preprocessing::run_preprocessing_job;

/// Build a staging archive off the async runtime.
pub(crate) async fn stage<F>(build: F) -> Result<Bytes, JobError>
where
    F: FnOnce(&mut StagingArchive) -> Result<(), RuntimeError> + Send + 'static,
{
    let staged = tokio::task::spawn_blocking(move || {
        let mut archive = StagingArchive::new();
        build(&mut archive)?;
        archive.finish()
    })
    .await
    .map_err(std::io::Error::other)??;
    Ok(staged)
}

/// Create a container from `spec`, copy `staged` into `dest`, start it
/// and capture its logs to `log_path` until it exits.
///
/// Returns `None` when the container vanished before its exit status could
/// be read; callers then judge the run by its outputs alone.
pub(crate) async fn run_container(
    ctx: &JobContext,
    spec: &ContainerSpec,
    staged: Bytes,
    dest: &str,
    log_path: &Path,
) -> Result<Option<ExitOutcome>, JobError> {
    let handle = ctx.runtime.create(spec).await?;
    let container = handle.name.as_str();

    let started = async {
        ctx.runtime.copy_in(&handle, staged, dest).await?;
        ctx.runtime.start(&handle).await
    }
    .await;
    if let Err(e) = started {
        if let Err(remove_err) = ctx.runtime.remove(&handle).await {
            tracing::warn!(container, error = %remove_err, "Failed to remove unstarted container");
        }
        return Err(e.into());
    }
    tracing::info!(container, "Container started");

    let logs = ctx.runtime.stream_logs(&handle);
    let (logged, exited) = tokio::join!(drain_to_file(logs, log_path), ctx.runtime.wait(&handle));

    if let Err(e) = logged {
        tracing::warn!(container, log = %log_path.display(), error = %e, "Log capture incomplete");
    }
    match exited {
        Ok(outcome) => {
            tracing::info!(container, status_code = outcome.status_code, "Container exited");
            Ok(Some(outcome))
        }
        Err(RuntimeError::NoSuchContainer(_)) => {
            tracing::warn!(container, "Container removed before its exit status was read");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Fail with [`JobError::ContainerExecution`] on a non-zero exit.
pub(crate) fn check_exit(
    outcome: Option<ExitOutcome>,
    container: &str,
    log_path: &Path,
) -> Result<(), JobError> {
    match outcome {
        Some(outcome) if !outcome.success() => Err(JobError::ContainerExecution {
            container: container.to_string(),
            reason: format!("exited with status {}", outcome.status_code),
            log_path: log_path.to_path_buf(),
        }),
        _ => Ok(()),
    }
}
