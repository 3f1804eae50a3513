//! Segmentation request rows.

use brainns_core::error::CoreError;
use brainns_core::sequence::SequenceIds;
use brainns_core::status::{SegmentationStatus, StatusId};
use brainns_core::types::{DbId, JobId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `segmentations` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Segmentation {
    pub id: DbId,
    pub project_id: DbId,
    pub name: String,
    pub model_id: String,
    pub t1_id: Option<DbId>,
    pub t1km_id: Option<DbId>,
    pub t2_id: Option<DbId>,
    pub flair_id: Option<DbId>,
    pub status_id: StatusId,
    pub preprocessing_key: String,
    pub preprocessing_job_id: Option<JobId>,
    pub prediction_job_id: Option<JobId>,
    pub display_values_id: Option<DbId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Segmentation {
    pub fn status(&self) -> Result<SegmentationStatus, CoreError> {
        SegmentationStatus::from_id(self.status_id).ok_or_else(|| {
            CoreError::Internal(format!(
                "Segmentation {} has unknown status id {}",
                self.id, self.status_id
            ))
        })
    }

    pub fn sequence_ids(&self) -> SequenceIds {
        SequenceIds {
            t1: self.t1_id,
            t1km: self.t1km_id,
            t2: self.t2_id,
            flair: self.flair_id,
        }
    }

    /// Ids of every job recorded on the row.
    pub fn job_ids(&self) -> impl Iterator<Item = JobId> {
        self.preprocessing_job_id
            .into_iter()
            .chain(self.prediction_job_id)
    }
}

/// DTO for inserting a segmentation.
#[derive(Debug, Clone)]
pub struct CreateSegmentation {
    pub project_id: DbId,
    pub name: String,
    pub model_id: String,
    pub sequences: SequenceIds,
    pub preprocessing_key: String,
    /// Existing display values to share. `None` creates a fresh row.
    pub display_values_id: Option<DbId>,
}

/// What a verified segmentation delete removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeletedSegmentation {
    pub id: DbId,
    pub project_id: DbId,
    /// Whether the shared display values became orphaned and were removed.
    pub display_values_removed: bool,
}
