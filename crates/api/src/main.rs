use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use brainns_core::model_registry::ModelRegistry;
use brainns_docker::DockerRuntime;
use brainns_pipeline::{status_channel, Backends, Coordinator, Reaper, StatusUpdater};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use brainns_api::config::ServerConfig;
use brainns_api::router::build_app_router;
use brainns_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "brainns_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let backends = Backends::connect(&database_url)
        .await
        .context("Failed to connect to database")?;
    backends
        .health_check()
        .await
        .context("Database health check failed")?;
    tracing::info!("Database health check passed");

    // --- Orchestration ---
    let registry = ModelRegistry::load(&config.pipeline.model_registry_path)
        .context("Failed to load model registry")?;
    tracing::info!(models = registry.len(), "Model registry loaded");

    let runtime = DockerRuntime::connect(config.docker_socket.as_deref())
        .context("Failed to connect to container engine")?;

    // Deletes fail dependents of other segmentations; their callbacks are
    // applied here.
    let (notifier, events) = status_channel();
    let updater_handle = tokio::spawn(StatusUpdater::new(backends.store.clone()).run(events));

    let coordinator = Coordinator::new(
        backends.queue.clone(),
        backends.store.clone(),
        Arc::new(registry),
        &config.pipeline,
    );
    let reaper = Reaper::new(
        backends.queue.clone(),
        backends.store.clone(),
        Arc::new(runtime),
        notifier,
        &config.pipeline,
    );

    let state = AppState {
        backends,
        coordinator,
        reaper,
        config: Arc::new(config.clone()),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(config.host.parse().context("Invalid HOST")?, config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;
    tracing::info!("Server stopped accepting connections");

    // The router (and with it the last notifier) is gone once serve returns.
    if let Err(e) = updater_handle.await {
        tracing::error!(error = %e, "Status updater panicked");
    }
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
