use std::path::PathBuf;
use std::time::Duration;

use brainns_core::storage::StorageLayout;

/// Orchestrator settings shared by the API and the worker.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub storage: StorageLayout,
    pub model_registry_path: PathBuf,
    /// Pause before the second container search during a delete.
    pub reaper_race_window: Duration,
    pub preprocessing_timeout: Duration,
    pub prediction_timeout: Duration,
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default                      |
    /// |------------------------------|------------------------------|
    /// | `STORAGE_ROOT`               | `/usr/src/image-repository`  |
    /// | `HOST_DATA_ROOT`             | value of `STORAGE_ROOT`      |
    /// | `MODEL_REGISTRY_PATH`        | `config/models.json`         |
    /// | `REAPER_RACE_WINDOW_MS`      | `3000`                       |
    /// | `PREPROCESSING_TIMEOUT_SECS` | `3600`                       |
    /// | `PREDICTION_TIMEOUT_SECS`    | `7200`                       |
    pub fn from_env() -> Self {
        let storage_root =
            std::env::var("STORAGE_ROOT").unwrap_or_else(|_| "/usr/src/image-repository".into());
        let host_root = std::env::var("HOST_DATA_ROOT").unwrap_or_else(|_| storage_root.clone());

        let model_registry_path = std::env::var("MODEL_REGISTRY_PATH")
            .unwrap_or_else(|_| "config/models.json".into())
            .into();

        let reaper_race_window_ms: u64 = std::env::var("REAPER_RACE_WINDOW_MS")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("REAPER_RACE_WINDOW_MS must be a valid u64");

        let preprocessing_timeout_secs: u64 = std::env::var("PREPROCESSING_TIMEOUT_SECS")
            .unwrap_or_else(|_| "3600".into())
            .parse()
            .expect("PREPROCESSING_TIMEOUT_SECS must be a valid u64");

        let prediction_timeout_secs: u64 = std::env::var("PREDICTION_TIMEOUT_SECS")
            .unwrap_or_else(|_| "7200".into())
            .parse()
            .expect("PREDICTION_TIMEOUT_SECS must be a valid u64");

        Self {
            storage: StorageLayout::new(storage_root, host_root),
            model_registry_path,
            reaper_race_window: Duration::from_millis(reaper_race_window_ms),
            preprocessing_timeout: Duration::from_secs(preprocessing_timeout_secs),
            prediction_timeout: Duration::from_secs(prediction_timeout_secs),
        }
    }

    /// Defaults rooted at `storage_root`, with no race window.
    pub fn for_root(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageLayout::local(storage_root),
            model_registry_path: PathBuf::from("config/models.json"),
            reaper_race_window: Duration::ZERO,
            preprocessing_timeout: Duration::from_secs(3600),
            prediction_timeout: Duration::from_secs(7200),
        }
    }
}
