//! Handlers for the `/projects` resource.

use axum::extract::{Path, State};
use axum::Json;
use brainns_core::types::DbId;

use crate::error::AppResult;
use crate::handlers::segmentation::{DeletionResponse, SegmentationResponse};
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/projects/{id}/segmentations
pub async fn list_segmentations(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<Vec<SegmentationResponse>>>> {
    let rows = state.coordinator.list_segmentations(id).await?;
    let data = rows
        .into_iter()
        .map(SegmentationResponse::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(DataResponse { data }))
}

/// DELETE /api/v1/projects/{id}
///
/// Kills running containers of the project without a grace period.
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DeletionResponse>> {
    let report = state.reaper.delete_project(id).await?;
    Ok(Json(report.into()))
}
