//! GPU discovery and allocation.
//!
//! [`DeviceProbe`] reads the current state of every accelerator;
//! [`GpuAllocator`] polls a probe until a device is idle enough for a job.

pub mod allocator;
pub mod error;
pub mod probe;

pub use allocator::GpuAllocator;
pub use error::GpuError;
pub use probe::{DeviceProbe, NvmlProbe, StaticProbe};
