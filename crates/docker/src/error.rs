use std::path::PathBuf;

/// Errors reported by a [`ContainerRuntime`](crate::ContainerRuntime).
///
/// Only low-level failures live here. A container that ran and exited with
/// a non-zero status is not an error at this layer.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Container engine error: {0}")]
    Engine(#[from] bollard::errors::Error),

    #[error("Image build failed for {tag}: {message}")]
    Build { tag: String, message: String },

    /// An input that must be staged into a container does not exist.
    #[error("Missing input: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("No such container: {0}")]
    NoSuchContainer(String),

    #[error("Container name already in use: {0}")]
    NameConflict(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
