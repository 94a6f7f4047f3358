//! Hosting of the reconciliation engine on the kube controller runtime.
//!
//! The runtime triggers a pass when a `ModelDeployment` changes, when an
//! owned Job, claim, Deployment or Service changes, and when a benchmark
//! result ConfigMap appears. It also guarantees at most one concurrent pass
//! per object.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use flexinfer_api::{deployment_for_results, ModelDeployment};
use flexinfer_reconcile::{Decision, FailureBackoff, Requeue};
use futures_util::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::api::ListParams;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::{Api, Client, Resource, ResourceExt};
use tracing::{debug, info, warn};

use crate::cluster::{Cluster, KubeCluster};
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::reconciler::{ReconcileSettings, Reconciler};

/// Shared state handed to every pass.
pub struct Context<C> {
    reconciler: Reconciler<C>,
    metrics: Arc<Metrics>,
    backoff: Mutex<FailureBackoff>,
}

impl<C: Cluster> Context<C> {
    pub fn new(reconciler: Reconciler<C>, metrics: Arc<Metrics>, backoff: FailureBackoff) -> Self {
        Self {
            reconciler,
            metrics,
            backoff: Mutex::new(backoff),
        }
    }

    fn backoff(&self) -> MutexGuard<'_, FailureBackoff> {
        self.backoff.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn object_key(md: &ModelDeployment) -> String {
    format!(
        "{}/{}",
        md.namespace().unwrap_or_default(),
        md.name_any()
    )
}

/// Translate a pass outcome into a runtime action.
pub fn action_for(decision: Option<Decision>) -> Action {
    match decision.map(|d| d.requeue) {
        Some(Requeue::Immediately) => Action::requeue(Duration::ZERO),
        Some(Requeue::After(delay)) => Action::requeue(delay),
        Some(Requeue::Never) | None => Action::await_change(),
    }
}

pub async fn reconcile<C: Cluster>(md: Arc<ModelDeployment>, ctx: Arc<Context<C>>) -> Result<Action> {
    let ns = md
        .namespace()
        .ok_or(Error::MissingObjectKey("metadata.namespace"))?;
    let name = md.name_any();

    match ctx.reconciler.reconcile(&ns, &name).await {
        Ok(decision) => {
            ctx.backoff().clear(&object_key(&md));
            Ok(action_for(decision))
        }
        Err(e) => {
            ctx.metrics.observe_error();
            Err(e)
        }
    }
}

/// Per-object exponential backoff; reset by the next successful pass.
pub fn error_policy<C: Cluster>(md: Arc<ModelDeployment>, error: &Error, ctx: Arc<Context<C>>) -> Action {
    let key = object_key(&md);
    let mut backoff = ctx.backoff();
    let delay = backoff.record_failure(&key);
    warn!(
        object = %key,
        error = %error,
        kind = error.kind(),
        failures = backoff.failures(&key),
        retry_in_ms = delay.as_millis() as u64,
        "reconcile failed"
    );
    Action::requeue(delay)
}

fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Run the controller until SIGTERM or ctrl-c.
pub async fn run(
    client: Client,
    namespace: Option<String>,
    settings: ReconcileSettings,
    metrics: Arc<Metrics>,
    backoff: FailureBackoff,
) -> Result<()> {
    let ns = namespace.as_deref();
    let deployments: Api<ModelDeployment> = scoped_api(&client, ns);

    // Fail fast when the CRD is not installed.
    deployments.list(&ListParams::default().limit(1)).await?;

    let reconciler = Reconciler::new(KubeCluster::new(client.clone()), settings, metrics.clone());
    let ctx = Arc::new(Context::new(reconciler, metrics, backoff));

    info!(namespace = ns.unwrap_or("<all>"), "starting controller");

    Controller::new(deployments, watcher::Config::default())
        .owns(scoped_api::<Job>(&client, ns), watcher::Config::default())
        .owns(
            scoped_api::<PersistentVolumeClaim>(&client, ns),
            watcher::Config::default(),
        )
        .owns(scoped_api::<Deployment>(&client, ns), watcher::Config::default())
        .owns(scoped_api::<Service>(&client, ns), watcher::Config::default())
        .watches(
            scoped_api::<ConfigMap>(&client, ns),
            watcher::Config::default(),
            results_owner,
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, action)) => debug!(object = %obj, ?action, "reconciled"),
                Err(e) => debug!(error = %e, "reconcile dispatch failed"),
            }
        })
        .await;

    info!("controller stopped");
    Ok(())
}

/// Map a benchmark result ConfigMap to the deployment it belongs to.
fn results_owner(cm: ConfigMap) -> Option<ObjectRef<ModelDeployment>> {
    let ns = cm.namespace()?;
    let name = deployment_for_results(cm.metadata.name.as_deref()?)?;
    Some(ObjectRef::new(name).within(&ns))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flexinfer_reconcile::{JobPhase, Step};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use rstest::rstest;

    fn config_map(ns: &str, name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(ns.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_results_owner() {
        let owner = results_owner(config_map("models", "llama-benchmark-results")).unwrap();
        assert_eq!(owner.name, "llama");
        assert_eq!(owner.namespace.as_deref(), Some("models"));

        assert!(results_owner(config_map("models", "kube-root-ca.crt")).is_none());
        assert!(results_owner(config_map("models", "-benchmark-results")).is_none());
    }

    #[rstest]
    #[case::immediately(
        Some(Decision { step: Step::CreateBenchmarkJob, requeue: Requeue::Immediately }),
        Action::requeue(Duration::ZERO)
    )]
    #[case::after_delay(
        Some(Decision {
            step: Step::AwaitBenchmark { job: JobPhase::Running },
            requeue: Requeue::After(Duration::from_secs(30)),
        }),
        Action::requeue(Duration::from_secs(30))
    )]
    #[case::converged(
        Some(Decision { step: Step::Converged, requeue: Requeue::Never }),
        Action::await_change()
    )]
    #[case::deleted(None, Action::await_change())]
    fn test_action_for(#[case] decision: Option<Decision>, #[case] expected: Action) {
        assert_eq!(action_for(decision), expected);
    }
}
