//! camstream: MJPEG camera streaming server

use std::sync::Arc;

use camstream::http::{self, AppState};
use camstream::{Config, ModeCatalog, StreamSession};
use color_eyre::{eyre::WrapErr, Result};
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "camstream=info".to_string()),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("camstream launching...");

    // Load configuration
    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref()).wrap_err("Failed to load configuration")?;

    let catalog = ModeCatalog::builtin().wrap_err("Invalid capture mode catalog")?;
    let session = StreamSession::new(config.capture.clone(), catalog)?;
    info!("Default capture mode: {}", session.current_mode().label);

    let probe = session.clone();
    if !tokio::task::spawn_blocking(move || probe.reprobe()).await? {
        warn!("No camera detected; streaming is disabled until a restart succeeds");
    }

    let state = Arc::new(AppState {
        session: session.clone(),
        capture_dir: config.server.capture_dir.clone(),
    });

    let bind = &config.server.bind;
    let listener = TcpListener::bind(bind)
        .await
        .wrap_err_with(|| format!("Failed to bind to {}", bind))?;
    info!("Camera server listening on http://{}", bind);

    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown(session.clone()))
        .await
        .wrap_err("Server error")?;

    // Shutdown hook: the capture process must never outlive the server
    tokio::task::spawn_blocking(move || session.stop_streaming()).await?;
    info!("camstream shut down");
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM, after stopping the stream so open MJPEG responses end
async fn shutdown(session: StreamSession) {
    let ctrl_c = tokio::signal::ctrl_c();
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            let _ = ctrl_c.await;
        }
    }

    info!("Shutdown requested, stopping capture");
    let _ = tokio::task::spawn_blocking(move || session.stop_streaming()).await;
}
