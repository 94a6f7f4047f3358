//! Extender configuration, read once from the environment.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use flexinfer_api::DEFAULT_LABEL_PREFIX;

use crate::score::ScoreWeights;

pub const DEFAULT_CACHE_SYNC_TIMEOUT: Duration = Duration::from_secs(60);

/// Room for full NodeList bodies on large clusters.
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub label_prefix: String,
    pub weights: ScoreWeights,
    pub cache_sync_timeout: Duration,
    pub max_body_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("FLEXINFER_SCHED_LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8888".to_string())
            .parse()
            .context("invalid FLEXINFER_SCHED_LISTEN_ADDR")?;

        let log_level =
            std::env::var("FLEXINFER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let label_prefix = std::env::var("FLEXINFER_LABEL_PREFIX")
            .unwrap_or_else(|_| DEFAULT_LABEL_PREFIX.to_string());

        let defaults = ScoreWeights::default();
        let weights = ScoreWeights {
            tps: env_f64("FLEXINFER_TPS_WEIGHT")?.unwrap_or(defaults.tps),
            util: env_f64("FLEXINFER_UTIL_WEIGHT")?.unwrap_or(defaults.util),
            cost: env_f64("FLEXINFER_COST_WEIGHT")?.unwrap_or(defaults.cost),
        };

        let cache_sync_timeout = match std::env::var("FLEXINFER_CACHE_SYNC_TIMEOUT_SECS") {
            Ok(raw) => Duration::from_secs(
                raw.trim()
                    .parse()
                    .with_context(|| format!("invalid FLEXINFER_CACHE_SYNC_TIMEOUT_SECS: {raw:?}"))?,
            ),
            Err(_) => DEFAULT_CACHE_SYNC_TIMEOUT,
        };

        let max_body_bytes = match std::env::var("FLEXINFER_SCHED_MAX_BODY_BYTES") {
            Ok(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("invalid FLEXINFER_SCHED_MAX_BODY_BYTES: {raw:?}"))?,
            Err(_) => DEFAULT_MAX_BODY_BYTES,
        };

        Ok(Self {
            listen_addr,
            log_level,
            label_prefix,
            weights,
            cache_sync_timeout,
            max_body_bytes,
        })
    }
}

fn env_f64(name: &str) -> Result<Option<f64>> {
    match std::env::var(name) {
        Ok(raw) => parse_weight(&raw)
            .map(Some)
            .with_context(|| format!("invalid {name}: {raw:?}")),
        Err(_) => Ok(None),
    }
}

/// A finite float. Negative weights are allowed.
pub fn parse_weight(raw: &str) -> Result<f64> {
    let value: f64 = raw.trim().parse()?;
    anyhow::ensure!(value.is_finite(), "weight must be finite");
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_weight() {
        assert_eq!(parse_weight("0.7").unwrap(), 0.7);
        assert_eq!(parse_weight(" 1 ").unwrap(), 1.0);
        assert_eq!(parse_weight("-0.5").unwrap(), -0.5);
        assert!(parse_weight("heavy").is_err());
        assert!(parse_weight("NaN").is_err());
        assert!(parse_weight("inf").is_err());
    }
}
