use std::sync::Arc;

use brainns_pipeline::{Backends, Coordinator, Reaper};

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: everything inside is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Queue and store, plus the pool for health checks.
    pub backends: Backends,
    pub coordinator: Coordinator,
    pub reaper: Reaper,
    pub config: Arc<ServerConfig>,
}
