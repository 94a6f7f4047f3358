//! flexinfer scheduler extender
//!
//! Serves `/filter`, `/score`, `/healthz` and `/metrics` for kube-scheduler.
//! Refuses to serve until the capability cache has synced.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use flexinfer_api::CapabilityKeys;
use flexinfer_sched::{
    api, cache::CapabilityCache, config::Config, metrics::Metrics, state::AppState,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Prefer RUST_LOG, fall back to FLEXINFER_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting flexinfer scheduler extender");
    info!(
        listen_addr = %config.listen_addr,
        label_prefix = %config.label_prefix,
        tps_weight = config.weights.tps,
        util_weight = config.weights.util,
        cost_weight = config.weights.cost,
        max_body_bytes = config.max_body_bytes,
        "Configuration loaded"
    );

    let client = kube::Client::try_default()
        .await
        .context("failed to build kubernetes client")?;

    let cache = CapabilityCache::connect(client, config.cache_sync_timeout)
        .await
        .context("capability cache failed to sync")?;

    let keys = CapabilityKeys::new(config.label_prefix.clone());
    for label in keys.label_keys() {
        info!(label, nodes = cache.count_labelled(label), "Capability label coverage");
    }

    let metrics = Arc::new(Metrics::new()?);
    let state = AppState::new(
        cache,
        keys,
        config.weights,
        metrics,
    );
    let app = api::create_router(state, config.max_body_bytes);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let mut server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
                info!("HTTP server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = shutdown_signal() => {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
            match tokio::time::timeout(Duration::from_secs(10), &mut server_handle).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => error!(error = %e, "Server error"),
                Ok(Err(e)) => error!(error = %e, "Server task panicked"),
                Err(_) => warn!("Server did not shut down in time"),
            }
        }
        result = &mut server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    info!("Scheduler extender shutdown complete");
    Ok(())
}

/// Resolves on ctrl-c or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
