//! Repository for the `sequences` table.

use brainns_core::types::DbId;
use sqlx::PgPool;

use crate::models::sequence::{CreateSequence, Sequence};

const COLUMNS: &str = "id, project_id, name, sequence_type, created_at";

/// Provides access to uploaded sequences.
pub struct SequenceRepo;

impl SequenceRepo {
    pub async fn create(pool: &PgPool, input: &CreateSequence) -> Result<Sequence, sqlx::Error> {
        let query = format!(
            "INSERT INTO sequences (project_id, name, sequence_type) VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Sequence>(&query)
            .bind(input.project_id)
            .bind(&input.name)
            .bind(&input.sequence_type)
            .fetch_one(pool)
            .await
    }

    /// Fetch every sequence whose id is in `ids`. Missing ids are skipped.
    pub async fn find_many(pool: &PgPool, ids: &[DbId]) -> Result<Vec<Sequence>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM sequences WHERE id = ANY($1) ORDER BY id");
        sqlx::query_as::<_, Sequence>(&query)
            .bind(ids)
            .fetch_all(pool)
            .await
    }
}
