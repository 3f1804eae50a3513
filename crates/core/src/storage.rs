//! On-disk layout of the image repository.
//!
//! ```text
//! {root}/projects/{project_id}/
//!     raw/{sequence_id}-{name}/{sequence_id}.nii.gz   uploaded sequences
//!     preprocessed/{key}/                              shared per sequence combination
//!     segmentations/{segmentation_id}/                 model output, one per request
//! ```
//!
//! The API and worker see the repository at `root`; the container engine
//! runs on the host and needs the same directories under `host_root` for
//! bind mounts.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::DbId;

/// Log file written next to every container's output.
pub const CONTAINER_LOG_FILE: &str = "container_logs.log";

/// Sub directory holding DICOM exports.
pub const DICOM_DIR: &str = "dicom";

/// Zipped DICOM series of the preprocessed inputs.
pub const DICOM_BUNDLE_FILE: &str = "sequences.zip";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLayout {
    pub root: PathBuf,
    pub host_root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>, host_root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            host_root: host_root.into(),
        }
    }

    /// Layout where the engine shares the process's view of the filesystem.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            host_root: root.clone(),
            root,
        }
    }

    pub fn project_dir(&self, project_id: DbId) -> PathBuf {
        self.root.join("projects").join(project_id.to_string())
    }

    pub fn raw_sequence_dir(&self, project_id: DbId, dir_name: &str) -> PathBuf {
        self.project_dir(project_id).join("raw").join(dir_name)
    }

    pub fn preprocessed_dir(&self, project_id: DbId, key: &str) -> PathBuf {
        self.project_dir(project_id).join("preprocessed").join(key)
    }

    pub fn segmentation_dir(&self, project_id: DbId, segmentation_id: DbId) -> PathBuf {
        self.project_dir(project_id)
            .join("segmentations")
            .join(segmentation_id.to_string())
    }

    /// Translate a path under `root` to the engine host's view.
    ///
    /// Paths outside `root` are returned unchanged.
    pub fn to_host(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(&self.root) {
            Ok(relative) => self.host_root.join(relative),
            Err(_) => path.to_path_buf(),
        }
    }
}
