use std::path::PathBuf;
use std::time::Duration;

use brainns_core::error::CoreError;
use brainns_docker::RuntimeError;
use brainns_gpu::GpuError;
use brainns_pipeline::{QueueError, StoreError};

/// Why a job failed. The message ends up on the failed queue row.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("GPU unavailable: {0}")]
    ResourceUnavailable(#[from] GpuError),

    /// The container ran but did not produce what it should have.
    #[error("Container {container} failed: {reason}. See {} for details", log_path.display())]
    ContainerExecution {
        container: String,
        reason: String,
        log_path: PathBuf,
    },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// The segmentation was deleted while its job was being claimed.
    #[error("Output directory {} no longer exists", .0.display())]
    OutputMissing(PathBuf),

    #[error("Conversion failed: {0}")]
    Conversion(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid job payload: {0}")]
    Payload(String),

    #[error("Job exceeded its timeout of {}s", .0.as_secs())]
    Timeout(Duration),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<CoreError> for JobError {
    fn from(err: CoreError) -> Self {
        JobError::Payload(err.to_string())
    }
}

impl From<QueueError> for JobError {
    fn from(err: QueueError) -> Self {
        JobError::Payload(err.to_string())
    }
}
