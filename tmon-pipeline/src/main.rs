//! tmon-pipeline - Topic Monitoring Pipeline
//!
//! Polls a content source for each monitored issue, stores what it finds,
//! accumulates articles per query and returns extracted topics to the
//! requester.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tmon_common::config::{load_config, resolve_config_path};
use tmon_common::events::EventBus;
use tmon_pipeline::cli::Cli;
use tmon_pipeline::{build_router, AppState, Collaborators};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config before tracing so the file can set the level
    let config_path = resolve_config_path(cli.config.as_deref());
    let config = load_config(config_path.as_deref());

    let default_level = match (&cli.log_level, &config) {
        (Some(level), _) => level.clone(),
        (None, Ok(config)) => config.logging.level.clone(),
        (None, Err(_)) => "info".to_string(),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config.context("Failed to load configuration")?;
    match &config_path {
        Some(path) if path.exists() => info!("Configuration: {}", path.display()),
        Some(path) => warn!("Config file {} not found, using defaults", path.display()),
        None => info!("Configuration: built-in defaults"),
    }

    info!("Starting tmon-pipeline");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let event_bus = EventBus::new(256);
    let collaborators = Collaborators::http(&config).context("Failed to build collaborator clients")?;
    let state = AppState::new(&config, collaborators, event_bus);
    let registry = state.registry.clone();

    let app = build_router(state);

    let port = cli.port.unwrap_or(config.port);
    let addr = format!("{}:{}", config.bind_address, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    registry.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
