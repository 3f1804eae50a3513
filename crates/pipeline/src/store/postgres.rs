//! [`SegmentationStore`] over the sqlx repositories.

use async_trait::async_trait;
use brainns_core::display::DisplayChannels;
use brainns_core::status::{SegmentationStatus, StatusChange};
use brainns_core::types::{DbId, JobId};
use brainns_db::models::project::{DeletedProject, Project};
use brainns_db::models::segmentation::{CreateSegmentation, DeletedSegmentation, Segmentation};
use brainns_db::models::sequence::Sequence;
use brainns_db::repositories::{
    DisplayValuesRepo, ProjectRepo, SegmentationRepo, SequenceRepo,
};
use brainns_db::DbPool;

use super::{SegmentationStore, StoreError};

#[derive(Clone)]
pub struct PgSegmentationStore {
    pool: DbPool,
}

impl PgSegmentationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SegmentationStore for PgSegmentationStore {
    async fn find_project(&self, id: DbId) -> Result<Option<Project>, StoreError> {
        Ok(ProjectRepo::find_by_id(&self.pool, id).await?)
    }

    async fn find_sequences(&self, ids: &[DbId]) -> Result<Vec<Sequence>, StoreError> {
        Ok(SequenceRepo::find_many(&self.pool, ids).await?)
    }

    async fn create_segmentation(
        &self,
        input: &CreateSegmentation,
    ) -> Result<Segmentation, StoreError> {
        Ok(SegmentationRepo::create(&self.pool, input).await?)
    }

    async fn find_segmentation(&self, id: DbId) -> Result<Option<Segmentation>, StoreError> {
        Ok(SegmentationRepo::find_by_id(&self.pool, id).await?)
    }

    async fn list_segmentations(&self, project_id: DbId) -> Result<Vec<Segmentation>, StoreError> {
        Ok(SegmentationRepo::list_by_project(&self.pool, project_id).await?)
    }

    async fn find_reusable(
        &self,
        project_id: DbId,
        preprocessing_key: &str,
    ) -> Result<Option<Segmentation>, StoreError> {
        Ok(SegmentationRepo::find_reusable(&self.pool, project_id, preprocessing_key).await?)
    }

    async fn set_job_ids(
        &self,
        id: DbId,
        preprocessing_job_id: Option<JobId>,
        prediction_job_id: Option<JobId>,
    ) -> Result<bool, StoreError> {
        Ok(
            SegmentationRepo::set_job_ids(&self.pool, id, preprocessing_job_id, prediction_job_id)
                .await?,
        )
    }

    async fn advance_status(
        &self,
        id: DbId,
        target: SegmentationStatus,
    ) -> Result<StatusChange, StoreError> {
        Ok(SegmentationRepo::advance_status(&self.pool, id, target).await?)
    }

    async fn delete_segmentation(
        &self,
        id: DbId,
    ) -> Result<Option<DeletedSegmentation>, StoreError> {
        Ok(SegmentationRepo::delete(&self.pool, id).await?)
    }

    async fn delete_project(&self, id: DbId) -> Result<Option<DeletedProject>, StoreError> {
        Ok(ProjectRepo::delete_with_contents(&self.pool, id).await?)
    }

    async fn record_display_values(
        &self,
        id: DbId,
        channels: &DisplayChannels,
    ) -> Result<bool, StoreError> {
        let value = serde_json::to_value(channels)
            .map_err(|e| StoreError::Corrupt(format!("display values: {e}")))?;
        Ok(DisplayValuesRepo::record(&self.pool, id, &value).await?)
    }

    async fn find_display_values(&self, id: DbId) -> Result<Option<DisplayChannels>, StoreError> {
        Ok(DisplayValuesRepo::find_by_id(&self.pool, id)
            .await?
            .and_then(|row| row.decoded()))
    }
}
