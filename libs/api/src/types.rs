//! The `ModelDeployment` custom resource.
//!
//! The CRD schema itself is maintained as YAML alongside the deployment
//! manifests; these types only describe what the controller reads and writes.

use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Replica count used when `spec.replicas` is omitted.
pub const DEFAULT_REPLICAS: i32 = 1;

/// Resource name under which the persistent storage size is requested.
pub const STORAGE_RESOURCE: &str = "storage";

/// Desired state of a model-serving workload.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "ai.flexinfer",
    version = "v1alpha1",
    kind = "ModelDeployment",
    namespaced,
    status = "ModelDeploymentStatus",
    schema = "disabled",
    shortname = "md",
    printcolumn = r#"{"name":"Backend","type":"string","jsonPath":".spec.backend"}"#,
    printcolumn = r#"{"name":"Model","type":"string","jsonPath":".spec.model"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"TPS","type":"number","jsonPath":".status.tokensPerSecond"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ModelDeploymentSpec {
    /// Serving backend (e.g. `ollama`, `vllm`).
    pub backend: String,

    /// Model identifier (e.g. `llama3:8b`).
    pub model: String,

    /// Desired pod count. Defaults to 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Compute and storage requirements for the serving container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Benchmark tuning knobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub benchmark: Option<BenchmarkSpec>,
}

/// Tuning knobs forwarded to the benchmark job.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkSpec {
    /// Warm-up iterations before measurement starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warmup_iterations: Option<i32>,

    /// Minimum measurement duration, as a Go-style duration string (`30s`, `2m`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_duration: Option<String>,
}

/// Observed state, written only through the status subresource.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelDeploymentStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Last benchmarked throughput for the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_second: Option<f64>,
}

impl ModelDeploymentStatus {
    /// Look up a condition by type.
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}

impl ModelDeployment {
    /// Replica count the workload should converge to.
    pub fn desired_replicas(&self) -> i32 {
        self.spec.replicas.unwrap_or(DEFAULT_REPLICAS).max(0)
    }

    /// Requested persistent storage size, if the spec declares one.
    pub fn storage_request(&self) -> Option<&Quantity> {
        self.spec
            .resources
            .as_ref()?
            .requests
            .as_ref()?
            .get(STORAGE_RESOURCE)
    }
}
