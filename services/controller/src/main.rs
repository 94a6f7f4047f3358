//! flexinfer controller
//!
//! Reconciles `ModelDeployment` resources into a benchmark job and, once a
//! benchmark result exists, a storage claim, a serving Deployment and a
//! Service. Exposes `/healthz` and `/metrics` on the metrics address.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use flexinfer_controller::{
    config::Config, controller, http, metrics::Metrics, reconciler::ReconcileSettings,
};
use flexinfer_reconcile::FailureBackoff;
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

    info!("Starting flexinfer controller");
    info!(
        metrics_addr = %config.metrics_addr,
        bench_image = %config.bench_image,
        default_backend_image = %config.default_backend_image,
        "Configuration loaded"
    );

    let client = kube::Client::try_default()
        .await
        .context("failed to build kubernetes client")?;

    let metrics = Arc::new(Metrics::new()?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let app = http::create_router(metrics.clone());
    let listener = tokio::net::TcpListener::bind(config.metrics_addr).await?;
    info!(addr = %config.metrics_addr, "Serving health and metrics");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
                info!("HTTP server shutting down");
            })
            .await
    });

    let settings = ReconcileSettings::from_config(&config);
    let backoff = FailureBackoff::new(config.backoff_base, config.backoff_max);

    // Returns once SIGTERM or ctrl-c has drained in-flight passes.
    let result = controller::run(
        client,
        config.watch_namespace.clone(),
        settings,
        metrics,
        backoff,
    )
    .await;
    if let Err(e) = &result {
        error!(error = %e, "Controller failed");
    }

    let _ = shutdown_tx.send(true);
    match tokio::time::timeout(Duration::from_secs(10), server_handle).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!(error = %e, "HTTP server error"),
        Ok(Err(e)) => error!(error = %e, "HTTP server task panicked"),
        Err(_) => warn!("HTTP server did not shut down in time"),
    }

    info!("Controller shutdown complete");
    result.map_err(Into::into)
}
