//! flexinfer controller library.
//!
//! This crate primarily ships the `flexinfer-controller` binary, but the
//! reconciliation engine is exposed as a library so it can be driven against
//! an in-memory cluster in tests.

pub mod cluster;
pub mod config;
pub mod controller;
pub mod error;
pub mod http;
pub mod metrics;
pub mod reconciler;
pub mod resources;
pub mod status;
