//! Prometheus metrics for the controller.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use flexinfer_reconcile::Step;
use prometheus::{
    Encoder, GaugeVec, Histogram, HistogramOpts, HistogramTimer, IntCounter, IntCounterVec, Opts,
    Registry, TextEncoder,
};

/// Controller metrics, registered on a private registry.
pub struct Metrics {
    registry: Registry,
    reconcile_total: IntCounterVec,
    reconcile_errors_total: IntCounter,
    reconcile_duration_seconds: Histogram,
    tokens_per_second: GaugeVec,

    /// `[model, backend]` of the throughput series each deployment owns.
    throughput_series: Mutex<HashMap<(String, String), [String; 2]>>,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconcile_total = IntCounterVec::new(
            Opts::new(
                "flexinfer_reconcile_total",
                "Reconcile passes, labelled by the step each pass took",
            ),
            &["step"],
        )?;
        let reconcile_errors_total = IntCounter::new(
            "flexinfer_reconcile_errors_total",
            "Reconcile passes that returned an error",
        )?;
        let reconcile_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "flexinfer_reconcile_duration_seconds",
            "Wall time of a reconcile pass",
        ))?;
        let tokens_per_second = GaugeVec::new(
            Opts::new(
                "flexinfer_tokens_per_second",
                "Benchmarked tokens per second of a deployment's model",
            ),
            &["namespace", "deployment", "model", "backend"],
        )?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(reconcile_errors_total.clone()))?;
        registry.register(Box::new(reconcile_duration_seconds.clone()))?;
        registry.register(Box::new(tokens_per_second.clone()))?;

        Ok(Self {
            registry,
            reconcile_total,
            reconcile_errors_total,
            reconcile_duration_seconds,
            tokens_per_second,
            throughput_series: Mutex::new(HashMap::new()),
        })
    }

    pub fn observe_step(&self, step: &Step) {
        self.reconcile_total.with_label_values(&[step.as_str()]).inc();
    }

    pub fn observe_error(&self) {
        self.reconcile_errors_total.inc();
    }

    /// Timer that records into the duration histogram when dropped.
    pub fn start_timer(&self) -> HistogramTimer {
        self.reconcile_duration_seconds.start_timer()
    }

    /// Set a deployment's throughput. A model or backend change replaces the
    /// deployment's previous series.
    pub fn set_tokens_per_second(
        &self,
        namespace: &str,
        deployment: &str,
        model: &str,
        backend: &str,
        value: f64,
    ) {
        let key = (namespace.to_string(), deployment.to_string());
        let labels = [model.to_string(), backend.to_string()];
        let mut series = self.series();
        if let Some(previous) = series.insert(key, labels.clone()) {
            if previous != labels {
                self.remove_series(namespace, deployment, &previous);
            }
        }
        self.tokens_per_second
            .with_label_values(&[namespace, deployment, model, backend])
            .set(value);
    }

    /// Drop the throughput series of a deleted deployment.
    pub fn forget_deployment(&self, namespace: &str, deployment: &str) {
        let key = (namespace.to_string(), deployment.to_string());
        if let Some(previous) = self.series().remove(&key) {
            self.remove_series(namespace, deployment, &previous);
        }
    }

    fn series(&self) -> MutexGuard<'_, HashMap<(String, String), [String; 2]>> {
        self.throughput_series
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn remove_series(&self, namespace: &str, deployment: &str, [model, backend]: &[String; 2]) {
        let _ = self
            .tokens_per_second
            .remove_label_values(&[namespace, deployment, model.as_str(), backend.as_str()]);
    }

    /// Text exposition of every registered metric.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_observations() {
        let metrics = Metrics::new().unwrap();
        metrics.observe_step(&Step::CreateBenchmarkJob);
        metrics.observe_error();
        metrics.set_tokens_per_second("models", "llama", "llama3:8b", "ollama", 150.0);

        let text = metrics.encode().unwrap();
        assert!(text.contains(r#"flexinfer_reconcile_total{step="create_benchmark_job"} 1"#));
        assert!(text.contains("flexinfer_reconcile_errors_total 1"));
        assert!(text.contains(
            r#"flexinfer_tokens_per_second{backend="ollama",deployment="llama",model="llama3:8b",namespace="models"} 150"#
        ));
    }

    #[test]
    fn test_throughput_series_per_deployment() {
        let metrics = Metrics::new().unwrap();
        metrics.set_tokens_per_second("models", "a", "llama3:8b", "ollama", 100.0);
        metrics.set_tokens_per_second("models", "b", "llama3:8b", "ollama", 50.0);

        let text = metrics.encode().unwrap();
        assert!(text.contains(r#"deployment="a",model="llama3:8b",namespace="models"} 100"#));
        assert!(text.contains(r#"deployment="b",model="llama3:8b",namespace="models"} 50"#));

        // Switching backends replaces the old series.
        metrics.set_tokens_per_second("models", "a", "llama3:8b", "vllm", 120.0);
        let text = metrics.encode().unwrap();
        assert!(!text.contains(r#"backend="ollama",deployment="a""#));
        assert!(text.contains(r#"backend="vllm",deployment="a",model="llama3:8b",namespace="models"} 120"#));

        metrics.forget_deployment("models", "a");
        metrics.forget_deployment("models", "missing");
        let text = metrics.encode().unwrap();
        assert!(!text.contains(r#"deployment="a""#));
        assert!(text.contains(r#"deployment="b""#));
    }
}
