//! [`JobQueue`] over the `jobs` table.

use async_trait::async_trait;
use brainns_core::types::JobId;
use brainns_db::repositories::JobRepo;
use brainns_db::DbPool;

use super::{
    convert_all, EnqueueRequest, Failure, JobHandle, JobQueue, QueueError, QueuedJob, Removal,
};

#[derive(Clone)]
pub struct PgJobQueue {
    pool: DbPool,
}

impl PgJobQueue {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, request: EnqueueRequest) -> Result<JobHandle, QueueError> {
        let row = JobRepo::enqueue(&self.pool, &request.to_row())
            .await?
            .ok_or(QueueError::DependencyUnavailable(
                request.depends_on.unwrap_or_default(),
            ))?;
        let job = QueuedJob::try_from(row)?;
        tracing::debug!(
            job_id = job.id,
            kind = %job.kind,
            segmentation_id = job.segmentation_id,
            depends_on = ?job.depends_on,
            "Job enqueued"
        );
        Ok(job.handle())
    }

    async fn fetch(&self, id: JobId) -> Result<Option<QueuedJob>, QueueError> {
        JobRepo::find_by_id(&self.pool, id)
            .await?
            .map(QueuedJob::try_from)
            .transpose()
    }

    async fn remove(&self, id: JobId) -> Result<Removal, QueueError> {
        match JobRepo::remove(&self.pool, id).await? {
            Some(cascade) => Ok(Removal::Removed {
                failed_dependents: convert_all(cascade.failed_dependents)?,
            }),
            None => Ok(Removal::NotRemovable),
        }
    }

    async fn list_pending(&self) -> Result<Vec<QueuedJob>, QueueError> {
        convert_all(JobRepo::list_pending(&self.pool).await?)
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<QueuedJob>, QueueError> {
        JobRepo::claim_next(&self.pool, worker_id)
            .await?
            .map(QueuedJob::try_from)
            .transpose()
    }

    async fn complete(&self, id: JobId) -> Result<Option<QueuedJob>, QueueError> {
        JobRepo::complete(&self.pool, id)
            .await?
            .map(QueuedJob::try_from)
            .transpose()
    }

    async fn fail(&self, id: JobId, error: &str) -> Result<Option<Failure>, QueueError> {
        let Some((job, cascade)) = JobRepo::fail(&self.pool, id, error).await? else {
            return Ok(None);
        };
        Ok(Some(Failure {
            job: QueuedJob::try_from(job)?,
            failed_dependents: convert_all(cascade.failed_dependents)?,
        }))
    }
}
