//! Project rows.

use brainns_core::error::CoreError;
use brainns_core::job_payload::FileFormat;
use brainns_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `projects` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Project {
    pub id: DbId,
    pub name: String,
    pub file_format: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Project {
    pub fn format(&self) -> Result<FileFormat, CoreError> {
        self.file_format.parse()
    }
}

/// DTO for inserting a project.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateProject {
    pub name: String,
    pub file_format: FileFormat,
}

/// Row counts removed together with a project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeletedProject {
    pub segmentations: u64,
    pub sequences: u64,
    pub display_values: u64,
}
