//! RSVP admission HTTP server.

use admission_runtime::metrics::install_recorder;
use admission_server::app::{build_state, sweeper};
use admission_server::config::{Config, DEFAULT_LOG_FILTER};
use admission_web::router;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_new(&config.server.log_level)
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting RSVP admission server");
    info!(
        backend = ?config.ledger.backend,
        reservation_ttl_ms = config.admission.reservation_ttl_ms,
        sweep_enabled = config.sweep.enabled,
        metrics_enabled = config.metrics.enabled,
        "Configuration loaded"
    );

    let metrics = if config.metrics.enabled {
        Some(install_recorder()?)
    } else {
        None
    };

    let state = build_state(&config, metrics).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweep_handle = sweeper(&config, &state).map(|s| s.spawn(shutdown_rx));

    let address = config.bind_address();
    let listener = TcpListener::bind(&address).await?;
    info!(address = %address, "HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, initiating graceful shutdown...");
    let _ = shutdown_tx.send(true);

    if let Some(handle) = sweep_handle {
        match tokio::time::timeout(config.shutdown_timeout(), handle).await {
            Ok(Ok(())) => info!("Reclaim sweeper stopped"),
            Ok(Err(e)) => warn!(error = %e, "Reclaim sweeper task failed"),
            Err(_) => warn!("Reclaim sweeper shutdown timed out"),
        }
    }

    info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
///
/// A handler that fails to install never fires; the other one still can.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal"),
        () = terminate => info!("Received SIGTERM signal"),
    }
}
