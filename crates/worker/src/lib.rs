//! Job worker: claims queued jobs and runs them as containers.
//!
//! [`WorkerLoop`] polls the queue and dispatches preprocessing and
//! prediction jobs to their runners in [`jobs`], which drive the container
//! runtime through a shared [`JobContext`].

pub mod config;
pub mod context;
pub mod convert;
pub mod error;
pub mod executor;
pub mod jobs;

pub use config::WorkerConfig;
pub use context::{JobContext, JobSettings, PREPROCESSING_IMAGE};
pub use convert::{CommandConverter, VolumeConverter};
pub use error::JobError;
pub use executor::WorkerLoop;
