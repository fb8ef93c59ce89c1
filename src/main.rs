//! Tiger - a self-contained web server
//!
//! Binary entry point: configuration, logging, background sweeper and the
//! HTTP listener.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tiger::{create_router, spawn_sweeper_task, AppState, Config};

/// Main entry point for the Tiger server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration (TOML file, then environment variables)
/// 3. Build cache, loader, executor and dispatcher
/// 4. Scan compiled scripts
/// 5. Start background sweeper
/// 6. Start HTTP server on configured address
/// 7. Handle graceful shutdown on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tiger=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Tiger {}", env!("CARGO_PKG_VERSION"));

    let config = Config::load().context("loading configuration")?;
    info!(
        "Configuration loaded: root={}, cache_max_size={}, exec_timeout={:?}, port={}",
        config.root.display(),
        config.cache_max_size,
        config.exec_timeout,
        config.server_port
    );

    let state = AppState::from_config(&config);
    info!("Cache medium: {}", state.cache.medium_description());

    // A broken scripts directory is not fatal: static files still serve.
    if let Err(e) = state.dispatcher.reload_scripts().await {
        warn!("Initial script scan failed: {}", e);
    }

    let sweeper = spawn_sweeper_task(state.dispatcher.clone(), config.sweep_interval);
    info!("Background sweeper started");

    let cache = state.cache.clone();
    let app = create_router(state, &config.admin_prefix);

    let addr = SocketAddr::new(config.bind_addr, config.server_port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(sweeper))
        .await
        .context("serving")?;

    cache.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM), then stops the sweeper.
async fn shutdown_signal(sweeper: JoinHandle<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    sweeper.abort();
    warn!("Sweeper task aborted");
}
