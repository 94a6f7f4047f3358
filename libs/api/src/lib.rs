//! # flexinfer-api
//!
//! Shared vocabulary between the reconciliation controller and the scheduling
//! extender. The two services never talk to each other directly; everything
//! they agree on lives in cluster-visible objects, and this crate defines the
//! shape and naming of those objects:
//!
//! - The `ModelDeployment` custom resource (`ai.flexinfer/v1alpha1`)
//! - Deterministic names for the benchmark job, result object and sub-resources
//! - Node capability label and annotation keys
//! - The benchmark result record written by the external benchmark job

mod benchmark;
mod capability;
mod error;
mod names;
mod types;

pub use benchmark::*;
pub use capability::*;
pub use error::BenchmarkResultError;
pub use names::*;
pub use types::*;
