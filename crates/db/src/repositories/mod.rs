//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument. Multi-statement mutations open
//! their own transaction.

pub mod display_values_repo;
pub mod job_repo;
pub mod project_repo;
pub mod segmentation_repo;
pub mod sequence_repo;

pub use display_values_repo::DisplayValuesRepo;
pub use job_repo::JobRepo;
pub use project_repo::ProjectRepo;
pub use segmentation_repo::SegmentationRepo;
pub use sequence_repo::SequenceRepo;
