//! Controller error type.

use thiserror::Error;

/// Result type for reconciliation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced to the controller runtime, which retries with backoff.
///
/// "Not found" never appears here: absent objects are `None` and drive the
/// next provisioning step.
#[derive(Debug, Error)]
pub enum Error {
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    #[error("object is missing {0}")]
    MissingObjectKey(&'static str),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid spec: {0}")]
    InvalidSpec(String),
}

impl Error {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Kube(_) => "kube",
            Self::MissingObjectKey(_) => "missing_object_key",
            Self::Serialization(_) => "serialization",
            Self::InvalidSpec(_) => "invalid_spec",
        }
    }
}
