//! Repository for the `projects` table.

use brainns_core::types::DbId;
use sqlx::PgPool;

use crate::models::project::{CreateProject, DeletedProject, Project};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, name, file_format, created_at, updated_at";

/// Provides access to projects.
pub struct ProjectRepo;

impl ProjectRepo {
    /// Insert a new project, returning the created row.
    pub async fn create(pool: &PgPool, input: &CreateProject) -> Result<Project, sqlx::Error> {
        let query = format!(
            "INSERT INTO projects (name, file_format) VALUES ($1, $2) RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Project>(&query)
            .bind(&input.name)
            .bind(input.file_format.as_str())
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Project>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM projects WHERE id = $1");
        sqlx::query_as::<_, Project>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Delete a project together with its sequences, segmentations and the
    /// display values no other segmentation references.
    ///
    /// Returns `None` (and rolls back) when the project does not exist.
    pub async fn delete_with_contents(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<DeletedProject>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let display_values_ids: Vec<DbId> = sqlx::query_scalar(
            "SELECT DISTINCT display_values_id FROM segmentations \
             WHERE project_id = $1 AND display_values_id IS NOT NULL",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        let segmentations = sqlx::query("DELETE FROM segmentations WHERE project_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let sequences = sqlx::query("DELETE FROM sequences WHERE project_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let projects = sqlx::query("DELETE FROM projects WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if projects != 1 {
            tx.rollback().await?;
            return Ok(None);
        }

        let display_values = sqlx::query(
            "DELETE FROM display_values d WHERE d.id = ANY($1) \
             AND NOT EXISTS (SELECT 1 FROM segmentations s WHERE s.display_values_id = d.id)",
        )
        .bind(&display_values_ids)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(Some(DeletedProject {
            segmentations,
            sequences,
            display_values,
        }))
    }
}
