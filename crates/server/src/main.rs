use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use podcast_jobs_core::{
    load_config, validate_config, ArtifactStore, Dispatcher, Engines, FsJobStatusStore,
    JobStatusStore, StageKind, StagePool, StageRunner,
};
use podcast_jobs_server::api::create_router;
use podcast_jobs_server::state::AppState;

/// How long accepted pipelines get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("PODJOBS_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Podcasts directory: {:?}", config.storage.podcasts_dir);
    info!("Speakers directory: {:?}", config.storage.speakers_dir);
    if !config.storage.podcasts_dir.is_dir() {
        warn!(
            "Podcasts directory {:?} does not exist; every submission will be rejected until it is provisioned",
            config.storage.podcasts_dir
        );
    }

    // Artifact layout and durable job status
    let artifacts = ArtifactStore::new(&config.storage);
    let store: Arc<dyn JobStatusStore> = Arc::new(FsJobStatusStore::new(artifacts.clone()));
    info!("Job status store initialized");

    // External engines
    let engines = Engines::from_config(&config.engines);
    for kind in StageKind::ALL {
        match config.engines.get(kind) {
            Some(engine) => info!(stage = %kind, program = ?engine.program, "Engine configured"),
            None => warn!(stage = %kind, "No engine configured; jobs for this stage will fail"),
        }
    }

    // Stage lanes
    let pool = Arc::new(StagePool::new(&config.stages));
    for (kind, lane) in config.stages.iter() {
        info!(
            stage = %kind,
            max_concurrent = lane.max_concurrent,
            timeout_secs = lane.timeout_secs,
            "Stage lane ready"
        );
    }

    let runner = Arc::new(StageRunner::new(
        artifacts,
        store,
        engines,
        pool,
        config.chunking.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(&config.dispatcher, runner));
    info!(
        "Dispatcher started (max pending pipelines: {})",
        config.dispatcher.max_pending_pipelines
    );

    // Create app state
    let state = Arc::new(AppState::new(config.clone(), Arc::clone(&dispatcher)));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    if dispatcher.shutdown(SHUTDOWN_GRACE).await {
        info!("All pipelines finished");
    } else {
        warn!("Exiting with pipelines still running");
    }

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
