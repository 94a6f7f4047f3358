//! Benchmark result record.
//!
//! The external benchmark job writes one ConfigMap per deployment, named
//! `<deployment>-benchmark-results`, with three string data keys. Both the
//! controller and the scheduling extender only ever read it.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::BenchmarkResultError;

/// Data key holding the model identifier.
pub const RESULT_MODEL_KEY: &str = "model";

/// Data key holding tokens per second as a decimal string.
pub const RESULT_TPS_KEY: &str = "tokensPerSecond";

/// Data key holding the RFC3339 measurement time.
pub const RESULT_TIMESTAMP_KEY: &str = "timestamp";

/// A decoded benchmark result.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkResult {
    pub model: String,
    pub tokens_per_second: f64,
    pub timestamp: DateTime<Utc>,
}

impl BenchmarkResult {
    /// Strictly decode a result object's data map.
    pub fn from_data(data: &BTreeMap<String, String>) -> Result<Self, BenchmarkResultError> {
        let model = data
            .get(RESULT_MODEL_KEY)
            .ok_or(BenchmarkResultError::MissingField(RESULT_MODEL_KEY))?
            .clone();

        let raw_tps = data
            .get(RESULT_TPS_KEY)
            .ok_or(BenchmarkResultError::MissingField(RESULT_TPS_KEY))?;
        let tokens_per_second = parse_finite(raw_tps)
            .ok_or_else(|| BenchmarkResultError::InvalidTokensPerSecond(raw_tps.clone()))?;

        let raw_ts = data
            .get(RESULT_TIMESTAMP_KEY)
            .ok_or(BenchmarkResultError::MissingField(RESULT_TIMESTAMP_KEY))?;
        let timestamp = DateTime::parse_from_rfc3339(raw_ts)
            .map_err(|_| BenchmarkResultError::InvalidTimestamp(raw_ts.clone()))?
            .with_timezone(&Utc);

        Ok(Self {
            model,
            tokens_per_second,
            timestamp,
        })
    }

    /// Encode into the three wire keys.
    pub fn to_data(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (RESULT_MODEL_KEY.to_string(), self.model.clone()),
            (RESULT_TPS_KEY.to_string(), self.tokens_per_second.to_string()),
            (
                RESULT_TIMESTAMP_KEY.to_string(),
                self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
        ])
    }
}

/// Tokens per second from a result data map, or 0 when missing or unparsable.
///
/// Scoring degrades to zero rather than failing the request.
pub fn tokens_per_second_lenient(data: Option<&BTreeMap<String, String>>) -> f64 {
    data.and_then(|d| d.get(RESULT_TPS_KEY))
        .and_then(|raw| parse_finite(raw))
        .unwrap_or(0.0)
}

/// Parse a float, rejecting NaN and infinities.
pub fn parse_finite(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}
