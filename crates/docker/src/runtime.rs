//! The container runtime contract.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use brainns_core::naming::{ContainerName, ContainerPrefix};
use brainns_core::types::DbId;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::RuntimeError;

/// Finite stream of raw log chunks (stdout and stderr interleaved).
pub type LogStream = BoxStream<'static, Result<Bytes, RuntimeError>>;

/// A container addressed by its unique name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle {
    pub name: String,
}

impl ContainerHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl From<ContainerName> for ContainerHandle {
    fn from(name: ContainerName) -> Self {
        Self::new(name.to_string())
    }
}

/// A host directory bind-mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeBinding {
    /// Path as seen by the engine host.
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

impl VolumeBinding {
    pub fn read_write(host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: false,
        }
    }

    /// `host:container[:ro]` bind string understood by the engine.
    pub fn bind_string(&self) -> String {
        let mut bind = format!("{}:{}", self.host_path.display(), self.container_path);
        if self.read_only {
            bind.push_str(":ro");
        }
        bind
    }
}

/// Accelerator devices requested for a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRequest {
    pub driver: String,
    pub device_ids: Vec<String>,
    pub capabilities: Vec<String>,
}

impl DeviceRequest {
    /// One NVIDIA GPU by index.
    pub fn nvidia_gpu(index: u32) -> Self {
        Self {
            driver: "nvidia".to_string(),
            device_ids: vec![index.to_string()],
            capabilities: vec!["gpu".to_string()],
        }
    }
}

/// Everything needed to create a detached container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub name: ContainerName,
    pub command: Vec<String>,
    pub volumes: Vec<VolumeBinding>,
    pub device_requests: Vec<DeviceRequest>,
    /// `uid[:gid]` to run as; engine default when `None`.
    pub user: Option<String>,
    pub auto_remove: bool,
}

/// Exit status reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    pub status_code: i64,
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }
}

/// Operations the orchestrator needs from a container engine.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Build `tag` from `build_context` unless it already exists.
    ///
    /// Check-then-build: two racing callers may both build.
    async fn ensure_image(&self, tag: &str, build_context: &Path) -> Result<(), RuntimeError>;

    /// Create a detached container without starting it.
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError>;

    /// Extract a tar archive into `dest_path` inside the container.
    async fn copy_in(
        &self,
        handle: &ContainerHandle,
        archive: Bytes,
        dest_path: &str,
    ) -> Result<(), RuntimeError>;

    async fn start(&self, handle: &ContainerHandle) -> Result<(), RuntimeError>;

    /// Follow the container's output until it exits.
    fn stream_logs(&self, handle: &ContainerHandle) -> LogStream;

    /// Block until the container exits.
    async fn wait(&self, handle: &ContainerHandle) -> Result<ExitOutcome, RuntimeError>;

    /// Containers named `{prefix}{segmentation_id}` for any of `prefixes`.
    async fn find_by_name_suffix(
        &self,
        prefixes: &[ContainerPrefix],
        segmentation_id: DbId,
    ) -> Result<Vec<ContainerHandle>, RuntimeError>;

    /// Stop (and with `auto_remove`, thereby remove) a container.
    ///
    /// `graceful = false` kills without a grace period. A container that is
    /// already gone is not an error.
    async fn stop(&self, handle: &ContainerHandle, graceful: bool) -> Result<(), RuntimeError>;

    /// Force-remove a container that may never have been started.
    async fn remove(&self, handle: &ContainerHandle) -> Result<(), RuntimeError>;
}
