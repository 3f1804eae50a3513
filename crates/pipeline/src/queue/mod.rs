//! Durable work queue with single-edge job dependencies.
//!
//! Two backends implement [`JobQueue`]: [`PgJobQueue`] over the `jobs` table
//! and [`MemoryJobQueue`] for tests and single-process development.
//!
//! A job enqueued against an unfinished dependency is `deferred` and is
//! never claimed until the dependency finishes. Failing or removing a job
//! fails its deferred dependents transitively; those are returned to the
//! caller so each dependent's `on_failure` callback fires exactly once.

use std::time::Duration;

use async_trait::async_trait;
use brainns_core::job_payload::{JobCallback, JobKind, PredictionJobInput, PreprocessingJobInput};
use brainns_core::types::{DbId, JobId, Timestamp};
use brainns_db::models::job::{CreateJob, Job};
use brainns_db::models::status::JobStatus;
use serde::de::DeserializeOwned;

pub mod memory;
pub mod postgres;

pub use memory::MemoryJobQueue;
pub use postgres::PgJobQueue;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The dependency is missing or has already failed.
    #[error("Dependency job {0} is missing or failed")]
    DependencyUnavailable(JobId),

    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    /// A stored row could not be interpreted.
    #[error("Corrupt job {id}: {reason}")]
    Corrupt { id: JobId, reason: String },

    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}

impl QueueError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            QueueError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            QueueError::Unavailable(_) => true,
            QueueError::DependencyUnavailable(_)
            | QueueError::InvalidPayload(_)
            | QueueError::Corrupt { .. } => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Requests and records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct EnqueueRequest {
    pub kind: JobKind,
    pub payload: serde_json::Value,
    /// Owning segmentation, readable without running the job.
    pub segmentation_id: DbId,
    pub depends_on: Option<JobId>,
    pub timeout: Duration,
    pub on_success: Option<JobCallback>,
    pub on_failure: Option<JobCallback>,
}

impl EnqueueRequest {
    /// Preprocessing job that marks the segmentation failed on error.
    pub fn preprocessing(
        input: &PreprocessingJobInput,
        timeout: Duration,
    ) -> Result<Self, QueueError> {
        input
            .validate()
            .map_err(|e| QueueError::InvalidPayload(e.to_string()))?;
        Ok(Self {
            kind: JobKind::Preprocess,
            payload: to_payload(input)?,
            segmentation_id: input.segmentation_id,
            depends_on: None,
            timeout,
            on_success: None,
            on_failure: Some(JobCallback::MarkError),
        })
    }

    /// Prediction job that finishes the segmentation either way.
    pub fn prediction(
        input: &PredictionJobInput,
        depends_on: Option<JobId>,
        timeout: Duration,
    ) -> Result<Self, QueueError> {
        input
            .validate()
            .map_err(|e| QueueError::InvalidPayload(e.to_string()))?;
        Ok(Self {
            kind: JobKind::Predict,
            payload: to_payload(input)?,
            segmentation_id: input.segmentation_id,
            depends_on,
            timeout,
            on_success: Some(JobCallback::MarkDone),
            on_failure: Some(JobCallback::MarkError),
        })
    }

    pub(crate) fn to_row(&self) -> CreateJob {
        CreateJob {
            kind: self.kind.as_str().to_string(),
            payload: self.payload.clone(),
            segmentation_id: self.segmentation_id,
            depends_on: self.depends_on,
            timeout_secs: self.timeout.as_secs().max(1) as i64,
            on_success: self.on_success.map(|c| c.as_str().to_string()),
            on_failure: self.on_failure.map(|c| c.as_str().to_string()),
        }
    }
}

fn to_payload<T: serde::Serialize>(input: &T) -> Result<serde_json::Value, QueueError> {
    serde_json::to_value(input).map_err(|e| QueueError::InvalidPayload(e.to_string()))
}

/// A job as stored in the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    pub id: JobId,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub segmentation_id: DbId,
    pub depends_on: Option<JobId>,
    pub timeout: Duration,
    pub on_success: Option<JobCallback>,
    pub on_failure: Option<JobCallback>,
    pub status: JobStatus,
    pub worker_id: Option<String>,
    pub error_message: Option<String>,
    pub enqueued_at: Timestamp,
}

impl QueuedJob {
    /// Deserialize the payload into the DTO matching `kind`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, QueueError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| QueueError::Corrupt {
            id: self.id,
            reason: format!("payload does not match {}: {e}", self.kind),
        })
    }

    pub fn handle(&self) -> JobHandle {
        JobHandle {
            id: self.id,
            status: self.status,
        }
    }
}

impl TryFrom<Job> for QueuedJob {
    type Error = QueueError;

    fn try_from(row: Job) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = |reason: String| QueueError::Corrupt { id, reason };
        let kind = row
            .kind
            .parse::<JobKind>()
            .map_err(|e| corrupt(e.to_string()))?;
        let on_success = parse_callback(row.on_success.as_deref()).map_err(corrupt)?;
        let on_failure = parse_callback(row.on_failure.as_deref()).map_err(corrupt)?;
        let status = JobStatus::from_id(row.status_id)
            .ok_or_else(|| corrupt(format!("unknown status id {}", row.status_id)))?;

        Ok(Self {
            id: row.id,
            kind,
            payload: row.payload,
            segmentation_id: row.segmentation_id,
            depends_on: row.depends_on,
            timeout: Duration::from_secs(row.timeout_secs.max(0) as u64),
            on_success,
            on_failure,
            status,
            worker_id: row.worker_id,
            error_message: row.error_message,
            enqueued_at: row.enqueued_at,
        })
    }
}

fn parse_callback(raw: Option<&str>) -> Result<Option<JobCallback>, String> {
    raw.map(|value| value.parse::<JobCallback>().map_err(|e| e.to_string()))
        .transpose()
}

/// Receipt of a successful enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobHandle {
    pub id: JobId,
    /// `Deferred` when waiting on a dependency, otherwise `Queued`.
    pub status: JobStatus,
}

/// Outcome of [`JobQueue::remove`].
#[derive(Debug, Clone, PartialEq)]
pub enum Removal {
    /// The job was pending and is gone; these dependents failed with it.
    Removed { failed_dependents: Vec<QueuedJob> },
    /// The job is missing, started or terminal and was left alone.
    NotRemovable,
}

impl Removal {
    pub fn is_removed(&self) -> bool {
        matches!(self, Removal::Removed { .. })
    }
}

/// Outcome of a successful [`JobQueue::fail`].
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub job: QueuedJob,
    pub failed_dependents: Vec<QueuedJob>,
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Store a job. Fails with [`QueueError::DependencyUnavailable`] when
    /// `depends_on` names a missing or failed job.
    async fn enqueue(&self, request: EnqueueRequest) -> Result<JobHandle, QueueError>;

    async fn fetch(&self, id: JobId) -> Result<Option<QueuedJob>, QueueError>;

    /// Delete a job that has not started.
    async fn remove(&self, id: JobId) -> Result<Removal, QueueError>;

    /// Deferred and queued jobs, oldest first.
    async fn list_pending(&self) -> Result<Vec<QueuedJob>, QueueError>;

    /// Claim the oldest queued job for `worker_id`.
    async fn claim_next(&self, worker_id: &str) -> Result<Option<QueuedJob>, QueueError>;

    /// Finish a started job, releasing its dependents. `None` if the job was
    /// not started, so success callbacks fire at most once.
    async fn complete(&self, id: JobId) -> Result<Option<QueuedJob>, QueueError>;

    /// Fail a started job and its dependents. `None` if the job was not
    /// started.
    async fn fail(&self, id: JobId, error: &str) -> Result<Option<Failure>, QueueError>;
}

pub(crate) fn convert_all(rows: Vec<Job>) -> Result<Vec<QueuedJob>, QueueError> {
    rows.into_iter().map(QueuedJob::try_from).collect()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use assert_matches::assert_matches;
    use brainns_core::sequence::SequenceKind;

    use super::*;

    fn prediction_input() -> PredictionJobInput {
        PredictionJobInput {
            segmentation_id: 7,
            model_id: "synthseg".into(),
            sequences: vec![SequenceKind::T1],
            preprocessed_dir: PathBuf::from("/data/projects/1/preprocessed/raw_0_3_0_0"),
            result_dir: PathBuf::from("/data/projects/1/segmentations/7"),
        }
    }

    #[test]
    fn prediction_request_wires_both_callbacks() {
        let request =
            EnqueueRequest::prediction(&prediction_input(), Some(3), Duration::from_secs(60))
                .unwrap();
        assert_eq!(request.kind, JobKind::Predict);
        assert_eq!(request.segmentation_id, 7);
        assert_eq!(request.depends_on, Some(3));
        assert_eq!(request.on_success, Some(JobCallback::MarkDone));
        assert_eq!(request.on_failure, Some(JobCallback::MarkError));
        assert_eq!(request.payload["model_id"], "synthseg");
    }

    #[test]
    fn invalid_payload_is_rejected_at_enqueue_time() {
        let mut input = prediction_input();
        input.result_dir = PathBuf::from("relative/7");
        assert_matches!(
            EnqueueRequest::prediction(&input, None, Duration::from_secs(60)),
            Err(QueueError::InvalidPayload(_))
        );
    }

    #[test]
    fn row_conversion_rejects_unknown_kind() {
        let row = Job {
            id: 1,
            kind: "train".into(),
            payload: serde_json::json!({}),
            segmentation_id: 1,
            depends_on: None,
            timeout_secs: 60,
            on_success: None,
            on_failure: None,
            status_id: JobStatus::Queued.id(),
            worker_id: None,
            error_message: None,
            enqueued_at: chrono::Utc::now(),
            started_at: None,
            ended_at: None,
        };
        assert_matches!(QueuedJob::try_from(row), Err(QueueError::Corrupt { id: 1, .. }));
    }
}
