//! Deterministic names and labels for objects derived from a `ModelDeployment`.
//!
//! Creates are idempotent at the name level: a repeated create after a crash
//! is rejected by the API server as "already exists".

use std::collections::BTreeMap;

/// Suffix of the benchmark job name.
pub const BENCHMARK_JOB_SUFFIX: &str = "-benchmark";

/// Suffix of the benchmark result object name.
pub const BENCHMARK_RESULTS_SUFFIX: &str = "-benchmark-results";

/// Label key shared by every object the controller creates.
pub const APP_LABEL: &str = "app";

/// Value of [`APP_LABEL`].
pub const APP_LABEL_VALUE: &str = "modeldeployment";

/// Label key carrying the owning deployment's name. The scheduling extender
/// reads it from pending pods to find the benchmark result.
pub const DEPLOYMENT_LABEL: &str = "modeldeployment_cr";

/// Name of the benchmark job for a deployment.
pub fn benchmark_job_name(deployment: &str) -> String {
    format!("{deployment}{BENCHMARK_JOB_SUFFIX}")
}

/// Name of the benchmark result object for a deployment.
pub fn benchmark_results_name(deployment: &str) -> String {
    format!("{deployment}{BENCHMARK_RESULTS_SUFFIX}")
}

/// Recover the deployment name from a benchmark result object name.
pub fn deployment_for_results(object_name: &str) -> Option<&str> {
    object_name
        .strip_suffix(BENCHMARK_RESULTS_SUFFIX)
        .filter(|name| !name.is_empty())
}

/// Selector labels for the workload and service of a deployment.
pub fn selector_labels(deployment: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_LABEL.to_string(), APP_LABEL_VALUE.to_string()),
        (DEPLOYMENT_LABEL.to_string(), deployment.to_string()),
    ])
}
