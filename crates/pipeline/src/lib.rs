//! Segmentation orchestration: job wiring, teardown and status updates.
//!
//! [`Coordinator`] turns requests into queued jobs, [`Reaper`] tears
//! segmentations and projects down, and [`StatusUpdater`] is the only
//! writer of segmentation statuses once a job has been queued. Everything
//! talks to durable state through the [`JobQueue`] and
//! [`SegmentationStore`] traits.

pub mod config;
pub mod coordinator;
pub mod deps;
pub mod error;
pub mod queue;
pub mod reaper;
pub mod status;
pub mod store;

pub use config::PipelineConfig;
pub use coordinator::{Coordinator, Submission};
pub use deps::Backends;
pub use error::PipelineError;
pub use queue::{EnqueueRequest, JobQueue, QueueError, QueuedJob};
pub use reaper::{CleanupError, DeletionReport, Reaper};
pub use status::{status_channel, RetryPolicy, StatusEvent, StatusNotifier, StatusUpdater};
pub use store::{SegmentationStore, StoreError};
