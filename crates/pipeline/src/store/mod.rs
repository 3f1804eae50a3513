//! Durable state the orchestrator reads and mutates.
//!
//! [`SegmentationStore`] is implemented by [`PgSegmentationStore`] (the
//! sqlx repositories) and by [`MemoryStore`]. Every method is one logical
//! mutation; multi-row changes are atomic in both backends.

use async_trait::async_trait;
use brainns_core::display::DisplayChannels;
use brainns_core::status::{SegmentationStatus, StatusChange};
use brainns_core::types::{DbId, JobId};
use brainns_db::models::project::{DeletedProject, Project};
use brainns_db::models::segmentation::{CreateSegmentation, DeletedSegmentation, Segmentation};
use brainns_db::models::sequence::Sequence;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgSegmentationStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            StoreError::Unavailable(_) => true,
            StoreError::Corrupt(_) => false,
        }
    }
}

#[async_trait]
pub trait SegmentationStore: Send + Sync {
    async fn find_project(&self, id: DbId) -> Result<Option<Project>, StoreError>;

    /// Sequences with the given ids, in id order. Unknown ids are skipped.
    async fn find_sequences(&self, ids: &[DbId]) -> Result<Vec<Sequence>, StoreError>;

    /// Insert a segmentation in `QUEUEING`, creating fresh display values
    /// when none are shared.
    async fn create_segmentation(
        &self,
        input: &CreateSegmentation,
    ) -> Result<Segmentation, StoreError>;

    async fn find_segmentation(&self, id: DbId) -> Result<Option<Segmentation>, StoreError>;

    async fn list_segmentations(&self, project_id: DbId) -> Result<Vec<Segmentation>, StoreError>;

    /// Newest non-error segmentation of the project with the same
    /// preprocessing key.
    async fn find_reusable(
        &self,
        project_id: DbId,
        preprocessing_key: &str,
    ) -> Result<Option<Segmentation>, StoreError>;

    /// Returns `false` when the row is gone.
    async fn set_job_ids(
        &self,
        id: DbId,
        preprocessing_job_id: Option<JobId>,
        prediction_job_id: Option<JobId>,
    ) -> Result<bool, StoreError>;

    /// Apply `target` if it is forward-reachable from the current status.
    async fn advance_status(
        &self,
        id: DbId,
        target: SegmentationStatus,
    ) -> Result<StatusChange, StoreError>;

    /// Verified delete of exactly one row. `None` when it did not exist.
    async fn delete_segmentation(
        &self,
        id: DbId,
    ) -> Result<Option<DeletedSegmentation>, StoreError>;

    /// Delete a project with its sequences, segmentations and orphaned
    /// display values. `None` when the project did not exist.
    async fn delete_project(&self, id: DbId) -> Result<Option<DeletedProject>, StoreError>;

    /// Write display values once. Returns `false` if already recorded or
    /// the row is gone.
    async fn record_display_values(
        &self,
        id: DbId,
        channels: &DisplayChannels,
    ) -> Result<bool, StoreError>;

    async fn find_display_values(&self, id: DbId) -> Result<Option<DisplayChannels>, StoreError>;
}
