//! Route definitions for the `/segmentations` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::segmentation;
use crate::state::AppState;

/// Routes mounted at `/segmentations`.
///
/// ```text
/// POST   /              -> submit
/// GET    /{id}          -> get_by_id
/// DELETE /{id}          -> delete
/// GET    /{id}/status   -> get_status
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(segmentation::submit))
        .route(
            "/{id}",
            get(segmentation::get_by_id).delete(segmentation::delete),
        )
        .route("/{id}/status", get(segmentation::get_status))
}
