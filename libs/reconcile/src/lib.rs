//! Reconciliation decision primitives.
//!
//! This library maps what a reconcile pass observed in the cluster to the
//! single next provisioning step for a `ModelDeployment`. Key concepts:
//!
//! - **Observed state**: presence of each dependent object, gathered by the caller.
//! - **Step**: the first missing prerequisite, or `Converged`.
//! - **Requeue**: when the controller runtime should invoke the pass again.
//!
//! # Invariants
//!
//! - Decisions are deterministic given the same inputs
//! - At most one step is taken per pass; the caller performs it and returns
//! - No sub-resource is provisioned before a benchmark result exists
//!
//! All cluster I/O stays with the caller so the ordering can be tested
//! without a live cluster.

use std::collections::BTreeMap;
use std::time::Duration;

/// Default delay between checks while a benchmark job is running.
pub const DEFAULT_BENCHMARK_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default first retry delay after a failed pass.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Default ceiling for the failure backoff.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(5 * 60);

/// Lifecycle of the benchmark job, as far as reconciliation cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    /// Job exists and has neither succeeded nor failed.
    Running,

    /// Job reported completion.
    Succeeded,

    /// Job reported a terminal failure.
    Failed,
}

/// Presence of each dependent object for one deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observed {
    /// Benchmark result object exists.
    pub benchmark_result: bool,

    /// Benchmark job, if it exists.
    pub benchmark_job: Option<JobPhase>,

    /// Storage claim exists.
    pub storage_claim: bool,

    /// Replica count of the workload, if it exists.
    pub workload_replicas: Option<i32>,

    /// Network service exists.
    pub service: bool,
}

/// The next action for a reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    CreateBenchmarkJob,

    /// Job exists but has not produced a result yet.
    AwaitBenchmark { job: JobPhase },

    CreateStorageClaim,
    CreateWorkload,
    ScaleWorkload { from: i32, to: i32 },
    CreateService,

    /// Everything exists and the replica count matches.
    Converged,
}

impl Step {
    /// Stable name for logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateBenchmarkJob => "create_benchmark_job",
            Self::AwaitBenchmark { .. } => "await_benchmark",
            Self::CreateStorageClaim => "create_storage_claim",
            Self::CreateWorkload => "create_workload",
            Self::ScaleWorkload { .. } => "scale_workload",
            Self::CreateService => "create_service",
            Self::Converged => "converged",
        }
    }

    /// Whether carrying out this step writes to the cluster.
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::AwaitBenchmark { .. } | Self::Converged)
    }

    pub fn convergence(&self) -> ConvergenceStatus {
        match self {
            Self::Converged => ConvergenceStatus::Converged,
            Self::AwaitBenchmark {
                job: JobPhase::Failed,
            } => ConvergenceStatus::Diverged,
            _ => ConvergenceStatus::Converging,
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Convergence status for a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    /// All sub-resources exist and match the spec.
    Converged,

    /// Provisioning is progressing.
    Converging,

    /// Progress is blocked on something that needs intervention.
    Diverged,
}

impl ConvergenceStatus {
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged)
    }
}

/// When the runtime should run the next pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Run again right away.
    Immediately,

    /// Run again after the delay.
    After(Duration),

    /// Wait for a watched object to change.
    Never,
}

/// Output of [`plan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub step: Step,
    pub requeue: Requeue,
}

/// Decide the single next step for one pass.
///
/// Prerequisites are checked in order: benchmark result, storage claim,
/// workload, replica count, service. The first unmet one wins.
pub fn plan(observed: &Observed, desired_replicas: i32, benchmark_poll: Duration) -> Decision {
    let step = next_step(observed, desired_replicas);
    let requeue = match step {
        Step::AwaitBenchmark { .. } => Requeue::After(benchmark_poll),
        Step::Converged => Requeue::Never,
        _ => Requeue::Immediately,
    };
    Decision { step, requeue }
}

fn next_step(observed: &Observed, desired_replicas: i32) -> Step {
    if !observed.benchmark_result {
        return match observed.benchmark_job {
            None => Step::CreateBenchmarkJob,
            Some(job) => Step::AwaitBenchmark { job },
        };
    }

    if !observed.storage_claim {
        return Step::CreateStorageClaim;
    }

    let Some(current) = observed.workload_replicas else {
        return Step::CreateWorkload;
    };

    if current != desired_replicas {
        return Step::ScaleWorkload {
            from: current,
            to: desired_replicas,
        };
    }

    if !observed.service {
        return Step::CreateService;
    }

    Step::Converged
}

/// Per-key exponential backoff for failed passes.
///
/// The delay doubles with each consecutive failure, starting at `base`
/// and capped at `max`. A successful pass clears the key.
#[derive(Debug, Clone)]
pub struct FailureBackoff {
    base: Duration,
    max: Duration,

    /// Consecutive failures per resource key.
    failures: BTreeMap<String, u32>,
}

impl FailureBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            failures: BTreeMap::new(),
        }
    }

    /// Record a failure and return the delay before the next attempt.
    pub fn record_failure(&mut self, resource_key: &str) -> Duration {
        let count = self
            .failures
            .entry(resource_key.to_string())
            .or_insert(0);
        *count = count.saturating_add(1);

        let exponent = (*count - 1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }

    /// Consecutive failures recorded for a key.
    pub fn failures(&self, resource_key: &str) -> u32 {
        self.failures.get(resource_key).copied().unwrap_or(0)
    }

    /// Forget a key after a successful pass.
    pub fn clear(&mut self, resource_key: &str) {
        self.failures.remove(resource_key);
    }
}

impl Default for FailureBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX)
    }
}
