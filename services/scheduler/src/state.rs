//! Application state shared across request handlers.

use std::sync::Arc;

use flexinfer_api::CapabilityKeys;

use crate::cache::CapabilityCache;
use crate::metrics::Metrics;
use crate::score::ScoreWeights;

/// Shared application state, passed to handlers via axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cache: CapabilityCache,
    keys: CapabilityKeys,
    weights: ScoreWeights,
    metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        cache: CapabilityCache,
        keys: CapabilityKeys,
        weights: ScoreWeights,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                cache,
                keys,
                weights,
                metrics,
            }),
        }
    }

    pub fn cache(&self) -> &CapabilityCache {
        &self.inner.cache
    }

    pub fn keys(&self) -> &CapabilityKeys {
        &self.inner.keys
    }

    pub fn weights(&self) -> &ScoreWeights {
        &self.inner.weights
    }

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }
}
