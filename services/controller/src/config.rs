use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use flexinfer_reconcile::{
    DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX, DEFAULT_BENCHMARK_POLL_INTERVAL,
};

/// Workload image used when neither the backend map nor `DEFAULT_BACKEND_IMAGE` applies.
pub const FALLBACK_BACKEND_IMAGE: &str = "ghcr.io/flexinfer/ollama:latest";

/// Benchmark job image used when `FLEXINFER_BENCH_IMAGE` is unset.
pub const DEFAULT_BENCH_IMAGE: &str = "flexinfer-bench:latest";

#[derive(Debug, Clone)]
pub struct Config {
    pub metrics_addr: SocketAddr,
    pub log_level: String,
    pub watch_namespace: Option<String>,
    pub default_backend_image: String,
    pub backend_images: BTreeMap<String, String>,
    pub bench_image: String,
    pub benchmark_poll: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let metrics_addr = std::env::var("FLEXINFER_METRICS_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:9100".to_string())
            .parse()
            .context("invalid FLEXINFER_METRICS_ADDR")?;

        let log_level =
            std::env::var("FLEXINFER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let watch_namespace = std::env::var("FLEXINFER_WATCH_NAMESPACE")
            .ok()
            .filter(|ns| !ns.is_empty());

        let default_backend_image = std::env::var("DEFAULT_BACKEND_IMAGE")
            .unwrap_or_else(|_| FALLBACK_BACKEND_IMAGE.to_string());

        let backend_images = match std::env::var("FLEXINFER_BACKEND_IMAGES") {
            Ok(raw) => parse_backend_images(&raw)?,
            Err(_) => BTreeMap::new(),
        };

        let bench_image = std::env::var("FLEXINFER_BENCH_IMAGE")
            .unwrap_or_else(|_| DEFAULT_BENCH_IMAGE.to_string());

        let benchmark_poll = env_u64("FLEXINFER_BENCHMARK_POLL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_BENCHMARK_POLL_INTERVAL);

        let backoff_base = env_u64("FLEXINFER_ERROR_BACKOFF_BASE_MS")?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_BACKOFF_BASE);

        let backoff_max = env_u64("FLEXINFER_ERROR_BACKOFF_MAX_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_BACKOFF_MAX);

        Ok(Self {
            metrics_addr,
            log_level,
            watch_namespace,
            default_backend_image,
            backend_images,
            bench_image,
            benchmark_poll,
            backoff_base,
            backoff_max,
        })
    }
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid {name}: {raw:?}")),
        Err(_) => Ok(None),
    }
}

/// Parse `backend=image` pairs separated by commas.
pub fn parse_backend_images(raw: &str) -> Result<BTreeMap<String, String>> {
    let mut images = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((backend, image)) = entry.split_once('=') else {
            bail!("invalid FLEXINFER_BACKEND_IMAGES entry {entry:?}, expected backend=image");
        };
        let (backend, image) = (backend.trim(), image.trim());
        if backend.is_empty() || image.is_empty() {
            bail!("invalid FLEXINFER_BACKEND_IMAGES entry {entry:?}, expected backend=image");
        }
        images.insert(backend.to_string(), image.to_string());
    }
    Ok(images)
}
