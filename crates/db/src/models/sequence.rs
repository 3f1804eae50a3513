//! Uploaded sequence rows.

use brainns_core::sequence::SequenceRef;
use brainns_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `sequences` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Sequence {
    pub id: DbId,
    pub project_id: DbId,
    pub name: String,
    /// Classified modality (`t1`, `t1km`, `t2`, `flair`), if known.
    pub sequence_type: Option<String>,
    pub created_at: Timestamp,
}

impl Sequence {
    pub fn to_ref(&self) -> SequenceRef {
        SequenceRef {
            id: self.id,
            name: self.name.clone(),
        }
    }
}

/// DTO for inserting a sequence.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSequence {
    pub project_id: DbId,
    pub name: String,
    pub sequence_type: Option<String>,
}
