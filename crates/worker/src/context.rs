use std::path::PathBuf;
use std::sync::Arc;

use brainns_core::gpu::AcquirePolicy;
use brainns_core::model_registry::ModelRegistry;
use brainns_core::storage::StorageLayout;
use brainns_docker::ContainerRuntime;
use brainns_gpu::GpuAllocator;
use brainns_pipeline::{SegmentationStore, StatusNotifier};

use crate::convert::VolumeConverter;

/// Tag of the image every preprocessing job runs.
pub const PREPROCESSING_IMAGE: &str = "preprocessing:brainns";

/// Settings shared by every job a worker runs.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub preprocessing_image: String,
    pub preprocessing_build_context: PathBuf,
    pub container_user: Option<String>,
    pub gpu: AcquirePolicy,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            preprocessing_image: PREPROCESSING_IMAGE.to_string(),
            preprocessing_build_context: PathBuf::from("/usr/src/preprocessing"),
            container_user: None,
            gpu: AcquirePolicy::default(),
        }
    }
}

/// Collaborators a job runs against. Cheap to clone.
#[derive(Clone)]
pub struct JobContext {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub allocator: GpuAllocator,
    pub store: Arc<dyn SegmentationStore>,
    pub notifier: StatusNotifier,
    pub registry: Arc<ModelRegistry>,
    pub converter: Arc<dyn VolumeConverter>,
    pub layout: StorageLayout,
    pub settings: JobSettings,
}
