//! The `ModelDeployment` reconciliation engine.
//!
//! One pass:
//! - Reads the deployment request; a missing object means it was deleted
//! - Observes the benchmark result, then (only once a result exists) the
//!   storage claim, workload and service, stopping at the first gap
//! - Carries out the single step [`plan`] picks
//! - Writes status when the derived status differs from the stored one
//!
//! Ownership references handle cleanup on delete, so there is no finalizer.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use flexinfer_api::{
    benchmark_job_name, benchmark_results_name, parse_finite, BenchmarkResult, ModelDeployment,
    RESULT_TPS_KEY,
};
use flexinfer_reconcile::{plan, Decision, JobPhase, Observed, Step};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use crate::cluster::Cluster;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::resources::{self, ImageResolver};
use crate::status::{desired_status, PassOutcome};

/// Knobs a pass needs beyond the cluster itself.
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub bench_image: String,
    pub images: ImageResolver,
    pub benchmark_poll: Duration,
}

impl ReconcileSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bench_image: config.bench_image.clone(),
            images: ImageResolver::new(
                config.default_backend_image.clone(),
                config.backend_images.clone(),
            ),
            benchmark_poll: config.benchmark_poll,
        }
    }
}

/// Drives one `ModelDeployment` one step closer to its spec per call.
pub struct Reconciler<C> {
    cluster: C,
    settings: ReconcileSettings,
    metrics: Arc<Metrics>,
}

impl<C: Cluster> Reconciler<C> {
    pub fn new(cluster: C, settings: ReconcileSettings, metrics: Arc<Metrics>) -> Self {
        Self {
            cluster,
            settings,
            metrics,
        }
    }

    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    /// Run one pass for `ns/name`.
    ///
    /// Returns `None` when the object no longer exists.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, ns: &str, name: &str) -> Result<Option<Decision>> {
        let _timer = self.metrics.start_timer();

        let Some(md) = self.cluster.get_model_deployment(ns, name).await? else {
            debug!("model deployment is gone, nothing to do");
            self.metrics.forget_deployment(ns, name);
            return Ok(None);
        };
        validate(&md)?;

        let result = self
            .cluster
            .get_config_map(ns, &benchmark_results_name(name))
            .await?;
        let observed = self.observe(ns, name, result.is_some()).await?;
        let decision = plan(&observed, md.desired_replicas(), self.settings.benchmark_poll);
        debug!(
            step = %decision.step,
            convergence = ?decision.step.convergence(),
            write = decision.step.is_write(),
            "planned"
        );

        self.apply(ns, &md, &decision.step).await?;
        self.metrics.observe_step(&decision.step);

        let tokens_per_second = result.as_ref().and_then(result_tokens_per_second);
        if let Some(tps) = tokens_per_second {
            self.metrics
                .set_tokens_per_second(ns, name, &md.spec.model, &md.spec.backend, tps);
        }

        let outcome = PassOutcome {
            step: decision.step,
            tokens_per_second,
            generation: md.metadata.generation,
        };
        let status = desired_status(md.status.as_ref(), &outcome, Utc::now());
        if md.status.as_ref() != Some(&status) {
            self.cluster.patch_status(ns, name, &status).await?;
            debug!("status updated");
        }

        Ok(Some(decision))
    }

    async fn observe(&self, ns: &str, name: &str, has_result: bool) -> Result<Observed> {
        let mut observed = Observed {
            benchmark_result: has_result,
            ..Default::default()
        };

        if !has_result {
            observed.benchmark_job = self
                .cluster
                .get_job(ns, &benchmark_job_name(name))
                .await?
                .map(|job| job_phase(&job));
            return Ok(observed);
        }

        observed.storage_claim = self.cluster.get_storage_claim(ns, name).await?.is_some();
        if !observed.storage_claim {
            return Ok(observed);
        }

        observed.workload_replicas = self
            .cluster
            .get_workload(ns, name)
            .await?
            .map(|d| d.spec.and_then(|s| s.replicas).unwrap_or(1));
        if observed.workload_replicas.is_none() {
            return Ok(observed);
        }

        observed.service = self.cluster.get_service(ns, name).await?.is_some();
        Ok(observed)
    }

    async fn apply(&self, ns: &str, md: &ModelDeployment, step: &Step) -> Result<()> {
        let name = md.name_any();
        match *step {
            Step::CreateBenchmarkJob => {
                let job = resources::benchmark_job(md, &self.settings.bench_image)?;
                self.cluster.create_job(ns, &job).await?;
                info!(job = %benchmark_job_name(&name), "created benchmark job");
            }
            Step::AwaitBenchmark { job } => match job {
                JobPhase::Failed => warn!(
                    job = %benchmark_job_name(&name),
                    "benchmark job failed without writing a result"
                ),
                _ => debug!(
                    job = %benchmark_job_name(&name),
                    poll_secs = self.settings.benchmark_poll.as_secs(),
                    "waiting for benchmark result"
                ),
            },
            Step::CreateStorageClaim => {
                let claim = resources::storage_claim(md)?;
                self.cluster.create_storage_claim(ns, &claim).await?;
                info!("created storage claim");
            }
            Step::CreateWorkload => {
                let workload = resources::workload(md, &self.settings.images)?;
                self.cluster.create_workload(ns, &workload).await?;
                info!(
                    image = %self.settings.images.resolve(&md.spec.backend),
                    "created workload"
                );
            }
            Step::ScaleWorkload { from, to } => {
                self.cluster.scale_workload(ns, &name, to).await?;
                info!(from, to, "scaled workload");
            }
            Step::CreateService => {
                let service = resources::service(md)?;
                self.cluster.create_service(ns, &service).await?;
                info!("created service");
            }
            Step::Converged => debug!("converged"),
        }
        Ok(())
    }
}

fn validate(md: &ModelDeployment) -> Result<()> {
    if md.spec.model.trim().is_empty() {
        return Err(Error::InvalidSpec("spec.model must not be empty".to_string()));
    }
    if let Some(replicas) = md.spec.replicas {
        if replicas < 0 {
            return Err(Error::InvalidSpec(format!(
                "spec.replicas must be >= 0, got {replicas}"
            )));
        }
    }
    Ok(())
}

/// Where a benchmark job stands, from its status.
pub fn job_phase(job: &Job) -> JobPhase {
    let Some(status) = &job.status else {
        return JobPhase::Running;
    };
    if status.succeeded.unwrap_or(0) > 0 {
        return JobPhase::Succeeded;
    }
    let failed = status
        .conditions
        .iter()
        .flatten()
        .any(|c| c.type_ == "Failed" && c.status == "True");
    if failed {
        JobPhase::Failed
    } else {
        JobPhase::Running
    }
}

/// Throughput from a result object.
///
/// A result that fails strict decoding is logged, but a parsable
/// `tokensPerSecond` is still used.
fn result_tokens_per_second(result: &ConfigMap) -> Option<f64> {
    let data = result.data.as_ref()?;
    match BenchmarkResult::from_data(data) {
        Ok(decoded) => {
            debug!(
                result = %result.name_any(),
                model = %decoded.model,
                measured_at = %decoded.timestamp,
                "read benchmark result"
            );
            Some(decoded.tokens_per_second)
        }
        Err(e) => {
            warn!(result = %result.name_any(), error = %e, "malformed benchmark result");
            data.get(RESULT_TPS_KEY).and_then(|raw| parse_finite(raw))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};
    use rstest::rstest;

    fn job(status: Option<JobStatus>) -> Job {
        Job {
            status,
            ..Default::default()
        }
    }

    fn failed() -> JobStatus {
        JobStatus {
            conditions: Some(vec![JobCondition {
                type_: "Failed".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }
    }

    #[rstest]
    #[case::no_status(None, JobPhase::Running)]
    #[case::active(Some(JobStatus { active: Some(1), ..Default::default() }), JobPhase::Running)]
    #[case::succeeded(
        Some(JobStatus { succeeded: Some(1), ..Default::default() }),
        JobPhase::Succeeded
    )]
    #[case::failed(Some(failed()), JobPhase::Failed)]
    fn test_job_phase(#[case] status: Option<JobStatus>, #[case] expected: JobPhase) {
        assert_eq!(job_phase(&job(status)), expected);
    }

    #[test]
    fn test_result_tokens_per_second() {
        let mut cm = ConfigMap::default();
        assert_eq!(result_tokens_per_second(&cm), None);

        cm.data = Some([(RESULT_TPS_KEY.to_string(), "12.5".to_string())].into());
        assert_eq!(result_tokens_per_second(&cm), Some(12.5));

        cm.data = Some([(RESULT_TPS_KEY.to_string(), "fast".to_string())].into());
        assert_eq!(result_tokens_per_second(&cm), None);

        cm.data = Some(
            [
                ("model".to_string(), "llama3:8b".to_string()),
                (RESULT_TPS_KEY.to_string(), "150.75".to_string()),
                ("timestamp".to_string(), "2025-06-01T12:00:00Z".to_string()),
            ]
            .into(),
        );
        assert_eq!(result_tokens_per_second(&cm), Some(150.75));
    }
}
