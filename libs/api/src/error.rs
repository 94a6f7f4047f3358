use thiserror::Error;

/// Errors from strictly decoding a benchmark result object.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BenchmarkResultError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid tokensPerSecond: {0}")]
    InvalidTokensPerSecond(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}
