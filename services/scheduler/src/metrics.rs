//! Prometheus metrics for the extender.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::filter::Rejection;

pub struct Metrics {
    registry: Registry,
    requests_total: IntCounterVec,
    filter_rejected_total: IntCounterVec,
    score_fail_open_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new(
                "flexinfer_extender_requests_total",
                "Extender requests by endpoint",
            ),
            &["endpoint"],
        )?;
        let filter_rejected_total = IntCounterVec::new(
            Opts::new(
                "flexinfer_filter_rejected_total",
                "Candidate nodes rejected by the filter stage",
            ),
            &["reason"],
        )?;
        let score_fail_open_total = IntCounter::new(
            "flexinfer_score_fail_open_total",
            "Score requests answered with all zeros for lack of a benchmark result",
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(filter_rejected_total.clone()))?;
        registry.register(Box::new(score_fail_open_total.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            filter_rejected_total,
            score_fail_open_total,
        })
    }

    pub fn observe_request(&self, endpoint: &str) {
        self.requests_total.with_label_values(&[endpoint]).inc();
    }

    pub fn observe_rejection(&self, reason: Rejection) {
        self.filter_rejected_total
            .with_label_values(&[reason.as_str()])
            .inc();
    }

    pub fn observe_fail_open(&self) {
        self.score_fail_open_total.inc();
    }

    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
