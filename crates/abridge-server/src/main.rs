//! Abridge Server - HTTP API for BART summarisation

use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod error;
mod source;
mod state;

use abridge_core::{EngineConfig, ServerConfig, SummaryEngine, MODEL_ID};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "abridge_server=debug,abridge_core=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Abridge Server");

    let config = EngineConfig::from_env()?;
    let server_config = ServerConfig::from_env()?;
    info!("Models directory: {:?}", config.models_dir);
    if let Some(dir) = &config.model_dir {
        info!("Using local checkpoint directory: {:?}", dir);
    }

    let engine = SummaryEngine::new(config)?;
    let state = AppState::new(engine);
    info!(
        "Summarisation engine initialized ({}, {} concurrent requests)",
        MODEL_ID,
        state.engine.config().max_concurrent
    );

    if let Err(e) = state.engine.preload().await {
        warn!("Preload failed, the model will load on first request: {}", e);
    }

    let app = api::create_router(state.clone(), server_config.cors_enabled);

    let addr = server_config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);

    let shutdown_state = state.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(shutdown_state));

    info!("Server ready. Press Ctrl+C to stop.");
    server.await?;

    Ok(())
}

/// Wait for a shutdown signal, then release the model.
async fn shutdown_signal(state: AppState) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        },
    }

    state.engine.unload_model().await;
}
