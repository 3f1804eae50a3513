//! Handlers for the `/segmentations` resource.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use brainns_core::sequence::SequenceIds;
use brainns_core::status::SegmentationStatus;
use brainns_core::submission::SubmitSegmentation;
use brainns_core::types::{DbId, JobId, Timestamp};
use brainns_db::models::segmentation::Segmentation;
use brainns_pipeline::{DeletionReport, Submission};
use serde::Serialize;

use crate::error::AppResult;
use crate::state::AppState;

/// A segmentation as returned to clients.
#[derive(Debug, Serialize)]
pub struct SegmentationResponse {
    pub id: DbId,
    pub project_id: DbId,
    pub name: String,
    pub model_id: String,
    pub sequences: SequenceIds,
    pub status: SegmentationStatus,
    pub preprocessing_job_id: Option<JobId>,
    pub prediction_job_id: Option<JobId>,
    pub display_values_id: Option<DbId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<Segmentation> for SegmentationResponse {
    type Error = brainns_core::error::CoreError;

    fn try_from(row: Segmentation) -> Result<Self, Self::Error> {
        Ok(Self {
            status: row.status()?,
            sequences: row.sequence_ids(),
            id: row.id,
            project_id: row.project_id,
            name: row.name,
            model_id: row.model_id,
            preprocessing_job_id: row.preprocessing_job_id,
            prediction_job_id: row.prediction_job_id,
            display_values_id: row.display_values_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub segmentation_id: DbId,
    pub status: SegmentationStatus,
}

/// Outcome of a delete, with cleanup problems as messages.
#[derive(Debug, Serialize)]
pub struct DeletionResponse {
    pub removed_jobs: Vec<JobId>,
    pub stopped_containers: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<brainns_db::models::project::DeletedProject>,
}

impl From<DeletionReport> for DeletionResponse {
    fn from(report: DeletionReport) -> Self {
        Self {
            removed_jobs: report.removed_jobs,
            stopped_containers: report.stopped_containers,
            warnings: report.warnings.iter().map(ToString::to_string).collect(),
            project: report.project,
        }
    }
}

/// POST /api/v1/segmentations
pub async fn submit(
    State(state): State<AppState>,
    Json(input): Json<SubmitSegmentation>,
) -> AppResult<(StatusCode, Json<Submission>)> {
    let submission = state.coordinator.submit(&input).await?;
    tracing::info!(
        segmentation_id = submission.segmentation_id,
        project_id = input.project_id,
        model = %input.model,
        "Segmentation submitted"
    );
    Ok((StatusCode::CREATED, Json(submission)))
}

/// GET /api/v1/segmentations/{id}
pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<SegmentationResponse>> {
    let row = state.coordinator.get_segmentation(id).await?;
    Ok(Json(SegmentationResponse::try_from(row)?))
}

/// GET /api/v1/segmentations/{id}/status
pub async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<StatusResponse>> {
    let status = state.coordinator.get_status(id).await?;
    Ok(Json(StatusResponse {
        segmentation_id: id,
        status,
    }))
}

/// DELETE /api/v1/segmentations/{id}
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DeletionResponse>> {
    let report = state.reaper.delete_segmentation(id).await?;
    Ok(Json(report.into()))
}
