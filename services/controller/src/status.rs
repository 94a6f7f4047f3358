//! Status derivation for `ModelDeployment`.
//!
//! The derived status is compared against what the object already carries;
//! the reconciler only writes when they differ.

use chrono::{DateTime, Utc};
use flexinfer_api::ModelDeploymentStatus;
use flexinfer_reconcile::{JobPhase, Step};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

pub const CONDITION_BENCHMARKED: &str = "Benchmarked";
pub const CONDITION_READY: &str = "Ready";

pub const REASON_BENCHMARK_PENDING: &str = "BenchmarkPending";
pub const REASON_BENCHMARK_FAILED: &str = "BenchmarkFailed";
pub const REASON_BENCHMARK_COMPLETE: &str = "BenchmarkComplete";
pub const REASON_CONVERGED: &str = "Converged";
pub const REASON_PROVISIONING: &str = "Provisioning";

/// What one pass learned that feeds into the status.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassOutcome {
    /// Step the pass planned.
    pub step: Step,

    /// Parsed throughput from the result object, if one exists and parses.
    pub tokens_per_second: Option<f64>,

    /// `metadata.generation` of the object the pass worked on.
    pub generation: Option<i64>,
}

/// Build the status a pass should leave behind.
///
/// Conditions keep their `lastTransitionTime` unless their status flips.
/// `tokensPerSecond` keeps its last value until a new result parses.
pub fn desired_status(
    current: Option<&ModelDeploymentStatus>,
    outcome: &PassOutcome,
    now: DateTime<Utc>,
) -> ModelDeploymentStatus {
    let mut status = current.cloned().unwrap_or_default();

    let (benchmarked, reason, message) = match outcome.step {
        Step::CreateBenchmarkJob | Step::AwaitBenchmark { job: JobPhase::Running } => (
            false,
            REASON_BENCHMARK_PENDING,
            "benchmark job has not produced a result yet".to_string(),
        ),
        Step::AwaitBenchmark {
            job: JobPhase::Failed,
        } => (
            false,
            REASON_BENCHMARK_FAILED,
            "benchmark job failed without producing a result".to_string(),
        ),
        Step::AwaitBenchmark {
            job: JobPhase::Succeeded,
        } => (
            false,
            REASON_BENCHMARK_PENDING,
            "benchmark job finished, waiting for the result object".to_string(),
        ),
        _ => (
            true,
            REASON_BENCHMARK_COMPLETE,
            match outcome.tokens_per_second {
                Some(tps) => format!("measured {tps} tokens/s"),
                None => "benchmark result recorded".to_string(),
            },
        ),
    };
    set_condition(
        &mut status.conditions,
        condition(CONDITION_BENCHMARKED, benchmarked, reason, message, outcome.generation),
        now,
    );

    let ready = outcome.step.convergence().is_converged();
    let (reason, message) = if ready {
        (REASON_CONVERGED, "all sub-resources are in place".to_string())
    } else {
        (REASON_PROVISIONING, format!("next step: {}", outcome.step))
    };
    set_condition(
        &mut status.conditions,
        condition(CONDITION_READY, ready, reason, message, outcome.generation),
        now,
    );

    if let Some(tps) = outcome.tokens_per_second {
        status.tokens_per_second = Some(tps);
    }

    status
}

fn condition(
    type_: &str,
    value: bool,
    reason: &str,
    message: String,
    generation: Option<i64>,
) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: if value { "True" } else { "False" }.to_string(),
        reason: reason.to_string(),
        message,
        observed_generation: generation,
        // Filled in by set_condition.
        last_transition_time: Time(DateTime::<Utc>::UNIX_EPOCH),
    }
}

/// Insert or update a condition by type.
pub fn set_condition(conditions: &mut Vec<Condition>, mut new: Condition, now: DateTime<Utc>) {
    match conditions.iter_mut().find(|c| c.type_ == new.type_) {
        Some(existing) => {
            new.last_transition_time = if existing.status == new.status {
                existing.last_transition_time.clone()
            } else {
                Time(now)
            };
            *existing = new;
        }
        None => {
            new.last_transition_time = Time(now);
            conditions.push(new);
        }
    }
}
