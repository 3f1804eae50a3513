//! Route definitions for the `/projects` resource.

use axum::routing::{delete, get};
use axum::Router;

use crate::handlers::project;
use crate::state::AppState;

/// Routes mounted at `/projects`.
///
/// ```text
/// DELETE /{id}                  -> delete
/// GET    /{id}/segmentations    -> list_segmentations
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}", delete(project::delete))
        .route("/{id}/segmentations", get(project::list_segmentations))
}
