//! Repository for the `segmentations` table.

use brainns_core::status::{SegmentationStatus, StatusChange, StatusId};
use brainns_core::types::{DbId, JobId};
use sqlx::PgPool;

use crate::models::segmentation::{CreateSegmentation, DeletedSegmentation, Segmentation};

/// Column list for `segmentations` queries.
const COLUMNS: &str = "\
    id, project_id, name, model_id, t1_id, t1km_id, t2_id, flair_id, \
    status_id, preprocessing_key, preprocessing_job_id, prediction_job_id, \
    display_values_id, created_at, updated_at";

/// Provides access to segmentation requests.
pub struct SegmentationRepo;

impl SegmentationRepo {
    /// Insert a segmentation in status `QUEUEING`.
    ///
    /// When `input.display_values_id` is `None` a fresh `display_values` row
    /// is inserted first in the same transaction.
    pub async fn create(
        pool: &PgPool,
        input: &CreateSegmentation,
    ) -> Result<Segmentation, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let display_values_id = match input.display_values_id {
            Some(id) => id,
            None => {
                sqlx::query_scalar::<_, DbId>(
                    "INSERT INTO display_values DEFAULT VALUES RETURNING id",
                )
                .fetch_one(&mut *tx)
                .await?
            }
        };

        let query = format!(
            "INSERT INTO segmentations \
                (project_id, name, model_id, t1_id, t1km_id, t2_id, flair_id, \
                 status_id, preprocessing_key, display_values_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {COLUMNS}"
        );
        let segmentation = sqlx::query_as::<_, Segmentation>(&query)
            .bind(input.project_id)
            .bind(&input.name)
            .bind(&input.model_id)
            .bind(input.sequences.t1)
            .bind(input.sequences.t1km)
            .bind(input.sequences.t2)
            .bind(input.sequences.flair)
            .bind(SegmentationStatus::Queueing.id())
            .bind(&input.preprocessing_key)
            .bind(display_values_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(segmentation)
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Segmentation>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM segmentations WHERE id = $1");
        sqlx::query_as::<_, Segmentation>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_by_project(
        pool: &PgPool,
        project_id: DbId,
    ) -> Result<Vec<Segmentation>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM segmentations WHERE project_id = $1 ORDER BY id");
        sqlx::query_as::<_, Segmentation>(&query)
            .bind(project_id)
            .fetch_all(pool)
            .await
    }

    /// Newest non-error segmentation of the project sharing the
    /// preprocessing key.
    pub async fn find_reusable(
        pool: &PgPool,
        project_id: DbId,
        preprocessing_key: &str,
    ) -> Result<Option<Segmentation>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM segmentations \
             WHERE project_id = $1 AND preprocessing_key = $2 AND status_id <> $3 \
             ORDER BY id DESC LIMIT 1"
        );
        sqlx::query_as::<_, Segmentation>(&query)
            .bind(project_id)
            .bind(preprocessing_key)
            .bind(SegmentationStatus::Error.id())
            .fetch_optional(pool)
            .await
    }

    /// Record the queue job ids. Returns `false` if the row is gone.
    pub async fn set_job_ids(
        pool: &PgPool,
        id: DbId,
        preprocessing_job_id: Option<JobId>,
        prediction_job_id: Option<JobId>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE segmentations \
             SET preprocessing_job_id = $2, prediction_job_id = $3, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(preprocessing_job_id)
        .bind(prediction_job_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Move the row to `target` if it is forward-reachable from the current
    /// status. The row is locked for the duration of the decision.
    pub async fn advance_status(
        pool: &PgPool,
        id: DbId,
        target: SegmentationStatus,
    ) -> Result<StatusChange, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let current: Option<StatusId> =
            sqlx::query_scalar("SELECT status_id FROM segmentations WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some(current) = current else {
            tx.rollback().await?;
            return Ok(StatusChange::Missing);
        };
        let Some(current) = SegmentationStatus::from_id(current) else {
            tx.rollback().await?;
            return Err(sqlx::Error::Decode(
                format!("unknown segmentation status id {current}").into(),
            ));
        };

        let change = StatusChange::decide(current, target);
        if change.is_applied() {
            let allowed: Vec<StatusId> = SegmentationStatus::predecessors_of(target)
                .into_iter()
                .map(SegmentationStatus::id)
                .collect();
            sqlx::query(
                "UPDATE segmentations SET status_id = $2, updated_at = NOW() \
                 WHERE id = $1 AND status_id = ANY($3)",
            )
            .bind(id)
            .bind(target.id())
            .bind(&allowed)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(change)
    }

    /// Delete one segmentation and its display values if no other row
    /// references them.
    ///
    /// Exactly one row must be removed; otherwise the transaction is rolled
    /// back and `None` is returned.
    pub async fn delete(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<DeletedSegmentation>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let deleted: Vec<(DbId, Option<DbId>)> = sqlx::query_as(
            "DELETE FROM segmentations WHERE id = $1 RETURNING project_id, display_values_id",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        let [(project_id, display_values_id)] = deleted.as_slice() else {
            tx.rollback().await?;
            return Ok(None);
        };

        let mut display_values_removed = false;
        if let Some(display_values_id) = display_values_id {
            display_values_removed = sqlx::query(
                "DELETE FROM display_values d WHERE d.id = $1 \
                 AND NOT EXISTS (SELECT 1 FROM segmentations s WHERE s.display_values_id = d.id)",
            )
            .bind(display_values_id)
            .execute(&mut *tx)
            .await?
            .rows_affected()
                == 1;
        }

        tx.commit().await?;
        Ok(Some(DeletedSegmentation {
            id,
            project_id: *project_id,
            display_values_removed,
        }))
    }
}
