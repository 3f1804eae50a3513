//! Queue job rows.

use brainns_core::status::StatusId;
use brainns_core::types::{DbId, JobId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: JobId,
    pub kind: String,
    pub payload: serde_json::Value,
    pub segmentation_id: DbId,
    pub depends_on: Option<JobId>,
    pub timeout_secs: i64,
    pub on_success: Option<String>,
    pub on_failure: Option<String>,
    pub status_id: StatusId,
    pub worker_id: Option<String>,
    pub error_message: Option<String>,
    pub enqueued_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
}

/// DTO for enqueueing a job.
#[derive(Debug, Clone)]
pub struct CreateJob {
    pub kind: String,
    pub payload: serde_json::Value,
    pub segmentation_id: DbId,
    pub depends_on: Option<JobId>,
    pub timeout_secs: i64,
    pub on_success: Option<String>,
    pub on_failure: Option<String>,
}

/// Result of failing (or removing) a job: every deferred dependent that was
/// transitively failed along with it.
#[derive(Debug, Clone, Default)]
pub struct Cascade {
    pub failed_dependents: Vec<Job>,
}
