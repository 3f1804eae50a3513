//! Container Runtime Adapter.
//!
//! [`ContainerRuntime`] is the seam between job runners and the container
//! engine. [`DockerRuntime`] talks to a Docker daemon through `bollard`;
//! the `testkit` feature adds an in-process [`testing::FakeRuntime`].

pub mod archive;
pub mod docker;
pub mod error;
pub mod logs;
pub mod runtime;

#[cfg(any(test, feature = "testkit"))]
pub mod testing;

pub use archive::StagingArchive;
pub use docker::DockerRuntime;
pub use error::RuntimeError;
pub use runtime::{
    ContainerHandle, ContainerRuntime, ContainerSpec, DeviceRequest, ExitOutcome, LogStream,
    VolumeBinding,
};
