//! Repository for the `jobs` table (the durable work queue).
//!
//! Jobs with an unfinished dependency are stored as `deferred` and become
//! `queued` when the dependency finishes. Failing or removing a job fails
//! every deferred dependent transitively.

use brainns_core::types::JobId;
use sqlx::{PgConnection, PgPool};

use crate::models::job::{Cascade, CreateJob, Job};
use crate::models::status::{JobStatus, StatusId};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, kind, payload, segmentation_id, depends_on, timeout_secs, \
    on_success, on_failure, status_id, worker_id, error_message, \
    enqueued_at, started_at, ended_at";

/// Error message stored on dependents failed by a cascade.
pub const DEPENDENCY_FAILED: &str = "dependency failed";

/// Provides queue operations over the `jobs` table.
pub struct JobRepo;

impl JobRepo {
    /// Insert a job.
    ///
    /// The dependency row is locked so the decision between `deferred` and
    /// `queued` cannot race a concurrent `complete`. Returns `None` when the
    /// dependency is missing or failed.
    pub async fn enqueue(pool: &PgPool, input: &CreateJob) -> Result<Option<Job>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let status = match input.depends_on {
            None => JobStatus::Queued,
            Some(dependency) => {
                let dependency_status: Option<StatusId> =
                    sqlx::query_scalar("SELECT status_id FROM jobs WHERE id = $1 FOR UPDATE")
                        .bind(dependency)
                        .fetch_optional(&mut *tx)
                        .await?;
                match dependency_status.and_then(JobStatus::from_id) {
                    Some(JobStatus::Finished) => JobStatus::Queued,
                    Some(JobStatus::Deferred | JobStatus::Queued | JobStatus::Started) => {
                        JobStatus::Deferred
                    }
                    Some(JobStatus::Failed) | None => {
                        tx.rollback().await?;
                        return Ok(None);
                    }
                }
            }
        };

        let query = format!(
            "INSERT INTO jobs \
                (kind, payload, segmentation_id, depends_on, timeout_secs, \
                 on_success, on_failure, status_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {COLUMNS}"
        );
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(&input.kind)
            .bind(&input.payload)
            .bind(input.segmentation_id)
            .bind(input.depends_on)
            .bind(input.timeout_secs)
            .bind(&input.on_success)
            .bind(&input.on_failure)
            .bind(status.id())
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(job))
    }

    pub async fn find_by_id(pool: &PgPool, id: JobId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Jobs that have not started yet, oldest first.
    pub async fn list_pending(pool: &PgPool) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE status_id IN ($1, $2) ORDER BY id");
        sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Deferred.id())
            .bind(JobStatus::Queued.id())
            .fetch_all(pool)
            .await
    }

    /// Atomically claim the oldest queued job for a worker.
    ///
    /// Uses `SELECT FOR UPDATE SKIP LOCKED` so concurrent workers never
    /// claim the same job.
    pub async fn claim_next(pool: &PgPool, worker_id: &str) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status_id = $2, worker_id = $1, started_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM jobs \
                 WHERE status_id = $3 \
                 ORDER BY id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(worker_id)
            .bind(JobStatus::Started.id())
            .bind(JobStatus::Queued.id())
            .fetch_optional(pool)
            .await
    }

    /// Mark a started job finished and release its deferred dependents.
    ///
    /// Returns `None` if the job was not in `started`.
    pub async fn complete(pool: &PgPool, id: JobId) -> Result<Option<Job>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "UPDATE jobs SET status_id = $2, ended_at = NOW() \
             WHERE id = $1 AND status_id = $3 \
             RETURNING {COLUMNS}"
        );
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(JobStatus::Finished.id())
            .bind(JobStatus::Started.id())
            .fetch_optional(&mut *tx)
            .await?;

        if job.is_some() {
            sqlx::query("UPDATE jobs SET status_id = $2 WHERE depends_on = $1 AND status_id = $3")
                .bind(id)
                .bind(JobStatus::Queued.id())
                .bind(JobStatus::Deferred.id())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(job)
    }

    /// Mark a started job failed and cascade the failure to its dependents.
    ///
    /// Returns `None` if the job was not in `started`.
    pub async fn fail(
        pool: &PgPool,
        id: JobId,
        error: &str,
    ) -> Result<Option<(Job, Cascade)>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "UPDATE jobs SET status_id = $2, error_message = $3, ended_at = NOW() \
             WHERE id = $1 AND status_id = $4 \
             RETURNING {COLUMNS}"
        );
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(JobStatus::Failed.id())
            .bind(error)
            .bind(JobStatus::Started.id())
            .fetch_optional(&mut *tx)
            .await?;

        let Some(job) = job else {
            tx.rollback().await?;
            return Ok(None);
        };

        let cascade = Self::fail_dependents(&mut *tx, id).await?;
        tx.commit().await?;
        Ok(Some((job, cascade)))
    }

    /// Delete a job that has not started and fail its dependents.
    ///
    /// Returns `None` if the job is missing, started or terminal.
    pub async fn remove(pool: &PgPool, id: JobId) -> Result<Option<Cascade>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let removed = sqlx::query("DELETE FROM jobs WHERE id = $1 AND status_id IN ($2, $3)")
            .bind(id)
            .bind(JobStatus::Deferred.id())
            .bind(JobStatus::Queued.id())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if removed != 1 {
            tx.rollback().await?;
            return Ok(None);
        }

        let cascade = Self::fail_dependents(&mut *tx, id).await?;
        tx.commit().await?;
        Ok(Some(cascade))
    }

    async fn fail_dependents(conn: &mut PgConnection, id: JobId) -> Result<Cascade, sqlx::Error> {
        let query = format!(
            "WITH RECURSIVE dependents AS ( \
                 SELECT id FROM jobs WHERE depends_on = $1 AND status_id = $2 \
                 UNION \
                 SELECT j.id FROM jobs j JOIN dependents d ON j.depends_on = d.id \
                 WHERE j.status_id = $2 \
             ) \
             UPDATE jobs SET status_id = $3, error_message = $4, ended_at = NOW() \
             WHERE id IN (SELECT id FROM dependents) \
             RETURNING {COLUMNS}"
        );
        let mut failed_dependents = sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(JobStatus::Deferred.id())
            .bind(JobStatus::Failed.id())
            .bind(DEPENDENCY_FAILED)
            .fetch_all(&mut *conn)
            .await?;
        failed_dependents.sort_by_key(|job| job.id);
        Ok(Cascade { failed_dependents })
    }
}
