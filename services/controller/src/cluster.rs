//! Cluster access for the reconciliation engine.
//!
//! The engine only needs point reads, creates, a replica patch and a status
//! patch. Keeping them behind a trait lets tests drive reconcile passes
//! against an in-memory cluster.

use async_trait::async_trait;
use flexinfer_api::{ModelDeployment, ModelDeploymentStatus};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Service};
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::Result;

/// Field manager recorded on every write.
pub const FIELD_MANAGER: &str = "flexinfer-controller";

/// Namespaced reads and writes used by a reconcile pass.
///
/// Reads return `Ok(None)` when the object does not exist. Creates succeed
/// when an object with the same name already exists.
#[async_trait]
pub trait Cluster: Send + Sync {
    async fn get_model_deployment(&self, ns: &str, name: &str) -> Result<Option<ModelDeployment>>;

    async fn get_config_map(&self, ns: &str, name: &str) -> Result<Option<ConfigMap>>;

    async fn get_job(&self, ns: &str, name: &str) -> Result<Option<Job>>;

    async fn get_storage_claim(&self, ns: &str, name: &str)
        -> Result<Option<PersistentVolumeClaim>>;

    async fn get_workload(&self, ns: &str, name: &str) -> Result<Option<Deployment>>;

    async fn get_service(&self, ns: &str, name: &str) -> Result<Option<Service>>;

    async fn create_job(&self, ns: &str, job: &Job) -> Result<()>;

    async fn create_storage_claim(&self, ns: &str, claim: &PersistentVolumeClaim) -> Result<()>;

    async fn create_workload(&self, ns: &str, workload: &Deployment) -> Result<()>;

    async fn create_service(&self, ns: &str, service: &Service) -> Result<()>;

    /// Set the workload's `spec.replicas`.
    async fn scale_workload(&self, ns: &str, name: &str, replicas: i32) -> Result<()>;

    /// Replace the deployment request's status through the status subresource.
    async fn patch_status(&self, ns: &str, name: &str, status: &ModelDeploymentStatus)
        -> Result<()>;
}

/// [`Cluster`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, ns: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), ns)
    }

    async fn get_opt<K>(&self, ns: &str, name: &str) -> Result<Option<K>>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + std::fmt::Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        Ok(self.api::<K>(ns).get_opt(name).await?)
    }

    fn patch_params() -> PatchParams {
        PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }

    async fn create<K>(&self, ns: &str, obj: &K) -> Result<()>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + std::fmt::Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        match self.api::<K>(ns).create(&params, obj).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 409 => {
                debug!(
                    namespace = ns,
                    name = obj.meta().name.as_deref().unwrap_or_default(),
                    "object already exists"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn get_model_deployment(&self, ns: &str, name: &str) -> Result<Option<ModelDeployment>> {
        self.get_opt(ns, name).await
    }

    async fn get_config_map(&self, ns: &str, name: &str) -> Result<Option<ConfigMap>> {
        self.get_opt(ns, name).await
    }

    async fn get_job(&self, ns: &str, name: &str) -> Result<Option<Job>> {
        self.get_opt(ns, name).await
    }

    async fn get_storage_claim(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>> {
        self.get_opt(ns, name).await
    }

    async fn get_workload(&self, ns: &str, name: &str) -> Result<Option<Deployment>> {
        self.get_opt(ns, name).await
    }

    async fn get_service(&self, ns: &str, name: &str) -> Result<Option<Service>> {
        self.get_opt(ns, name).await
    }

    async fn create_job(&self, ns: &str, job: &Job) -> Result<()> {
        self.create(ns, job).await
    }

    async fn create_storage_claim(&self, ns: &str, claim: &PersistentVolumeClaim) -> Result<()> {
        self.create(ns, claim).await
    }

    async fn create_workload(&self, ns: &str, workload: &Deployment) -> Result<()> {
        self.create(ns, workload).await
    }

    async fn create_service(&self, ns: &str, service: &Service) -> Result<()> {
        self.create(ns, service).await
    }

    async fn scale_workload(&self, ns: &str, name: &str, replicas: i32) -> Result<()> {
        let patch = serde_json::json!({ "spec": { "replicas": replicas } });
        self.api::<Deployment>(ns)
            .patch(name, &Self::patch_params(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_status(
        &self,
        ns: &str,
        name: &str,
        status: &ModelDeploymentStatus,
    ) -> Result<()> {
        let status = serde_json::to_value(status)?;
        let patch = serde_json::json!({ "status": status });
        self.api::<ModelDeployment>(ns)
            .patch_status(name, &Self::patch_params(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
