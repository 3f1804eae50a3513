pub mod health;
pub mod project;
pub mod segmentation;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /segmentations                     submit
/// /segmentations/{id}                get, delete
/// /segmentations/{id}/status         status
/// /projects/{id}                     delete
/// /projects/{id}/segmentations       list
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/segmentations", segmentation::router())
        .nest("/projects", project::router())
}
