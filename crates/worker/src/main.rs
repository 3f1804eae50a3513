use std::sync::Arc;

use anyhow::Context;
use brainns_core::model_registry::ModelRegistry;
use brainns_docker::DockerRuntime;
use brainns_gpu::{GpuAllocator, NvmlProbe};
use brainns_pipeline::{status_channel, Backends, StatusUpdater};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use brainns_worker::{CommandConverter, JobContext, JobSettings, WorkerConfig, WorkerLoop};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "brainns_worker=debug,brainns_pipeline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = WorkerConfig::from_env();
    tracing::info!(
        concurrency = config.concurrency,
        worker_name = %config.worker_name,
        storage_root = %config.pipeline.storage.root.display(),
        "Loaded worker configuration"
    );

    // --- Backends ---
    let backends = Backends::connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created, migrations applied");

    let registry = ModelRegistry::load(&config.pipeline.model_registry_path)
        .context("Failed to load model registry")?;
    tracing::info!(models = registry.len(), "Model registry loaded");

    let runtime = DockerRuntime::connect(config.docker_socket.as_deref())
        .context("Failed to connect to container engine")?;

    let probe = NvmlProbe::new();

    let converter = CommandConverter::from_command_line(&config.converter_command)
        .context("Invalid CONVERTER_COMMAND")?;

    // --- Status updater ---
    let (notifier, events) = status_channel();
    let updater_handle = tokio::spawn(StatusUpdater::new(backends.store.clone()).run(events));

    let ctx = JobContext {
        runtime: Arc::new(runtime),
        allocator: GpuAllocator::new(Arc::new(probe)),
        store: backends.store.clone(),
        notifier,
        registry: Arc::new(registry),
        converter: Arc::new(converter),
        layout: config.pipeline.storage.clone(),
        settings: JobSettings {
            preprocessing_build_context: config.preprocessing_build_context.clone(),
            container_user: config.container_user.clone(),
            gpu: config.gpu,
            ..JobSettings::default()
        },
    };

    // --- Worker loops ---
    let cancel = CancellationToken::new();
    let mut handles = Vec::with_capacity(config.concurrency);
    for n in 0..config.concurrency {
        let worker = WorkerLoop::new(
            format!("{}-{n}", config.worker_name),
            backends.queue.clone(),
            ctx.clone(),
        )
        .with_poll_interval(config.poll_interval);
        let token = cancel.clone();
        handles.push(tokio::spawn(async move { worker.run(token).await }));
    }
    tracing::info!(workers = handles.len(), "Worker loops started");

    shutdown_signal().await;

    // --- Shutdown ---
    cancel.cancel();
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Worker loop panicked");
        }
    }
    tracing::info!("Worker loops stopped");

    // The updater exits once every notifier is gone.
    drop(ctx);
    if let Err(e) = updater_handle.await {
        tracing::error!(error = %e, "Status updater panicked");
    }
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
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
