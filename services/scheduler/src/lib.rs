//! flexinfer scheduler extender.
//!
//! A kube-scheduler extender that narrows candidate nodes to those with a
//! GPU and ranks them by the benchmarked throughput of the pod's model,
//! penalized by node utilization and cost. All cluster reads go through an
//! in-memory [`cache::CapabilityCache`].

pub mod api;
pub mod cache;
pub mod config;
pub mod extender;
pub mod filter;
pub mod metrics;
pub mod score;
pub mod state;
