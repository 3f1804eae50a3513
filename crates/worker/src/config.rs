use std::path::PathBuf;
use std::time::Duration;

use brainns_core::gpu::AcquirePolicy;
use brainns_pipeline::PipelineConfig;

/// Worker process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub pipeline: PipelineConfig,
    /// Directory the preprocessing image is built from.
    pub preprocessing_build_context: PathBuf,
    /// `uid[:gid]` every job container runs as.
    pub container_user: Option<String>,
    pub docker_socket: Option<String>,
    /// Number of concurrent worker loops.
    pub concurrency: usize,
    pub poll_interval: Duration,
    /// Prefix of the worker ids recorded on claimed jobs.
    pub worker_name: String,
    pub gpu: AcquirePolicy,
    pub converter_command: String,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default                  |
    /// |-------------------------------|--------------------------|
    /// | `DATABASE_URL`                | required                 |
    /// | `PREPROCESSING_BUILD_CONTEXT` | `/usr/src/preprocessing` |
    /// | `CONTAINER_USER`              | unset                    |
    /// | `DOCKER_SOCKET`               | local defaults           |
    /// | `WORKER_CONCURRENCY`          | `1`                      |
    /// | `WORKER_POLL_INTERVAL_MS`     | `1000`                   |
    /// | `WORKER_NAME`                 | `brainns-worker`         |
    /// | `GPU_MAX_LOAD`                | `0.5`                    |
    /// | `GPU_MAX_MEMORY`              | `0.5`                    |
    /// | `GPU_ATTEMPTS`                | `100`                    |
    /// | `GPU_INTERVAL_SECS`           | `5`                      |
    /// | `CONVERTER_COMMAND`           | `nifti2dicom`            |
    ///
    /// Storage and model registry settings come from
    /// [`PipelineConfig::from_env`].
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let preprocessing_build_context = std::env::var("PREPROCESSING_BUILD_CONTEXT")
            .unwrap_or_else(|_| "/usr/src/preprocessing".into())
            .into();

        let container_user = std::env::var("CONTAINER_USER")
            .ok()
            .filter(|s| !s.is_empty());
        let docker_socket = std::env::var("DOCKER_SOCKET").ok().filter(|s| !s.is_empty());

        let concurrency: usize = std::env::var("WORKER_CONCURRENCY")
            .unwrap_or_else(|_| "1".into())
            .parse()
            .expect("WORKER_CONCURRENCY must be a valid usize");

        let poll_interval_ms: u64 = std::env::var("WORKER_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "1000".into())
            .parse()
            .expect("WORKER_POLL_INTERVAL_MS must be a valid u64");

        let worker_name =
            std::env::var("WORKER_NAME").unwrap_or_else(|_| "brainns-worker".into());

        let defaults = AcquirePolicy::default();
        let max_load: f64 = std::env::var("GPU_MAX_LOAD")
            .unwrap_or_else(|_| defaults.max_load.to_string())
            .parse()
            .expect("GPU_MAX_LOAD must be a valid f64");
        let max_memory: f64 = std::env::var("GPU_MAX_MEMORY")
            .unwrap_or_else(|_| defaults.max_memory.to_string())
            .parse()
            .expect("GPU_MAX_MEMORY must be a valid f64");
        let attempts: u32 = std::env::var("GPU_ATTEMPTS")
            .unwrap_or_else(|_| defaults.attempts.to_string())
            .parse()
            .expect("GPU_ATTEMPTS must be a valid u32");
        let interval_secs: u64 = std::env::var("GPU_INTERVAL_SECS")
            .unwrap_or_else(|_| defaults.interval.as_secs().to_string())
            .parse()
            .expect("GPU_INTERVAL_SECS must be a valid u64");

        let converter_command =
            std::env::var("CONVERTER_COMMAND").unwrap_or_else(|_| "nifti2dicom".into());

        Self {
            database_url,
            pipeline: PipelineConfig::from_env(),
            preprocessing_build_context,
            container_user,
            docker_socket,
            concurrency: concurrency.max(1),
            poll_interval: Duration::from_millis(poll_interval_ms),
            worker_name,
            gpu: AcquirePolicy {
                max_load,
                max_memory,
                attempts,
                interval: Duration::from_secs(interval_secs),
                ..defaults
            },
            converter_command,
        }
    }
}
