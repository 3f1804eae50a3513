//! Repository for the `display_values` table.

use brainns_core::types::DbId;
use sqlx::PgPool;

use crate::models::display_values::DisplayValues;

const COLUMNS: &str = "id, channels, created_at, updated_at";

/// Provides access to shared display values.
pub struct DisplayValuesRepo;

impl DisplayValuesRepo {
    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<DisplayValues>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM display_values WHERE id = $1");
        sqlx::query_as::<_, DisplayValues>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Store the channels once.
    ///
    /// Returns `false` when the row is missing or its channels were already
    /// recorded; the stored value is never overwritten.
    pub async fn record(
        pool: &PgPool,
        id: DbId,
        channels: &serde_json::Value,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE display_values SET channels = $2, updated_at = NOW() \
             WHERE id = $1 AND channels IS NULL",
        )
        .bind(id)
        .bind(channels)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
