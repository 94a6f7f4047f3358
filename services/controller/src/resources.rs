//! Builders for the objects a `ModelDeployment` owns.
//!
//! Every object gets a controller owner reference to the deployment request,
//! so deleting the request garbage-collects everything below it.

use std::collections::BTreeMap;

use flexinfer_api::{
    benchmark_job_name, benchmark_results_name, selector_labels, ModelDeployment,
    STORAGE_RESOURCE,
};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, ObjectFieldSelector, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec,
    ResourceRequirements, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};

use crate::error::{Error, Result};

/// Port the serving container listens on.
pub const BACKEND_PORT: i32 = 11434;

/// Name of the serving container and its port.
pub const BACKEND_CONTAINER: &str = "llm-backend";
pub const BACKEND_PORT_NAME: &str = "http";

/// Model cache volume, backed by the storage claim.
pub const MODEL_CACHE_VOLUME: &str = "model-cache";
pub const MODEL_CACHE_MOUNT: &str = "/models";

/// Claim size when the spec requests no storage.
pub const DEFAULT_STORAGE_REQUEST: &str = "10Gi";

pub const BENCH_CONTAINER: &str = "flexinfer-bench";

/// Resolves the serving image for a backend.
#[derive(Debug, Clone)]
pub struct ImageResolver {
    default_image: String,
    by_backend: BTreeMap<String, String>,
}

impl ImageResolver {
    pub fn new(default_image: impl Into<String>, by_backend: BTreeMap<String, String>) -> Self {
        Self {
            default_image: default_image.into(),
            by_backend,
        }
    }

    pub fn resolve(&self, backend: &str) -> &str {
        self.by_backend
            .get(backend)
            .map(String::as_str)
            .unwrap_or(&self.default_image)
    }
}

/// Namespace and controller owner reference shared by every built object.
struct Owner {
    name: String,
    namespace: String,
    reference: OwnerReference,
}

impl Owner {
    fn of(md: &ModelDeployment) -> Result<Self> {
        let namespace = md
            .namespace()
            .ok_or(Error::MissingObjectKey("metadata.namespace"))?;
        let reference = md
            .controller_owner_ref(&())
            .ok_or(Error::MissingObjectKey("metadata.uid"))?;
        Ok(Self {
            name: md.name_any(),
            namespace,
            reference,
        })
    }

    fn meta(&self, name: String) -> ObjectMeta {
        ObjectMeta {
            name: Some(name),
            namespace: Some(self.namespace.clone()),
            labels: Some(selector_labels(&self.name)),
            owner_references: Some(vec![self.reference.clone()]),
            ..Default::default()
        }
    }
}

/// The benchmark job, which writes `<name>-benchmark-results` when done.
pub fn benchmark_job(md: &ModelDeployment, bench_image: &str) -> Result<Job> {
    let owner = Owner::of(md)?;

    let mut args = vec![
        "--model".to_string(),
        md.spec.model.clone(),
        "--configmap".to_string(),
        benchmark_results_name(&owner.name),
    ];
    if let Some(bench) = &md.spec.benchmark {
        if let Some(warmup) = bench.warmup_iterations {
            args.push("--warmup-iterations".to_string());
            args.push(warmup.to_string());
        }
        if let Some(min_duration) = &bench.min_duration {
            args.push("--min-duration".to_string());
            args.push(min_duration.clone());
        }
    }

    Ok(Job {
        metadata: owner.meta(benchmark_job_name(&owner.name)),
        spec: Some(JobSpec {
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: BENCH_CONTAINER.to_string(),
                        image: Some(bench_image.to_string()),
                        args: Some(args),
                        env: Some(vec![EnvVar {
                            name: "POD_NAMESPACE".to_string(),
                            value_from: Some(EnvVarSource {
                                field_ref: Some(ObjectFieldSelector {
                                    field_path: "metadata.namespace".to_string(),
                                    ..Default::default()
                                }),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    restart_policy: Some("Never".to_string()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// The model cache claim, sized from `spec.resources.requests.storage`.
pub fn storage_claim(md: &ModelDeployment) -> Result<PersistentVolumeClaim> {
    let owner = Owner::of(md)?;
    let size = md
        .storage_request()
        .cloned()
        .unwrap_or_else(|| Quantity(DEFAULT_STORAGE_REQUEST.to_string()));

    Ok(PersistentVolumeClaim {
        metadata: owner.meta(owner.name.clone()),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(STORAGE_RESOURCE.to_string(), size)])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// The serving workload.
pub fn workload(md: &ModelDeployment, images: &ImageResolver) -> Result<Deployment> {
    let owner = Owner::of(md)?;
    let labels = selector_labels(&owner.name);

    let container = Container {
        name: BACKEND_CONTAINER.to_string(),
        image: Some(images.resolve(&md.spec.backend).to_string()),
        ports: Some(vec![ContainerPort {
            container_port: BACKEND_PORT,
            name: Some(BACKEND_PORT_NAME.to_string()),
            ..Default::default()
        }]),
        env: Some(vec![EnvVar {
            name: "MODEL".to_string(),
            value: Some(md.spec.model.clone()),
            ..Default::default()
        }]),
        resources: md.spec.resources.as_ref().map(container_resources),
        volume_mounts: Some(vec![VolumeMount {
            name: MODEL_CACHE_VOLUME.to_string(),
            mount_path: MODEL_CACHE_MOUNT.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    };

    Ok(Deployment {
        metadata: owner.meta(owner.name.clone()),
        spec: Some(DeploymentSpec {
            replicas: Some(md.desired_replicas()),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(vec![Volume {
                        name: MODEL_CACHE_VOLUME.to_string(),
                        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                            claim_name: owner.name.clone(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// The service in front of the workload.
pub fn service(md: &ModelDeployment) -> Result<Service> {
    let owner = Owner::of(md)?;

    Ok(Service {
        metadata: owner.meta(owner.name.clone()),
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(&owner.name)),
            ports: Some(vec![ServicePort {
                name: Some(BACKEND_PORT_NAME.to_string()),
                port: BACKEND_PORT,
                target_port: Some(IntOrString::String(BACKEND_PORT_NAME.to_string())),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Container resources without the storage request, which only applies to the claim.
fn container_resources(resources: &ResourceRequirements) -> ResourceRequirements {
    let strip = |list: &Option<BTreeMap<String, Quantity>>| {
        list.as_ref()
            .map(|l| {
                l.iter()
                    .filter(|(k, _)| k.as_str() != STORAGE_RESOURCE)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<BTreeMap<_, _>>()
            })
            .filter(|l| !l.is_empty())
    };
    ResourceRequirements {
        claims: resources.claims.clone(),
        limits: strip(&resources.limits),
        requests: strip(&resources.requests),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flexinfer_api::{BenchmarkSpec, ModelDeploymentSpec, DEPLOYMENT_LABEL};

    fn model_deployment() -> ModelDeployment {
        let mut md = ModelDeployment::new(
            "llama",
            ModelDeploymentSpec {
                backend: "vllm".to_string(),
                model: "llama3:8b".to_string(),
                replicas: Some(2),
                resources: Some(ResourceRequirements {
                    requests: Some(BTreeMap::from([
                        ("cpu".to_string(), Quantity("2".to_string())),
                        ("storage".to_string(), Quantity("1Gi".to_string())),
                    ])),
                    ..Default::default()
                }),
                benchmark: Some(BenchmarkSpec {
                    warmup_iterations: Some(3),
                    min_duration: Some("1m".to_string()),
                }),
            },
        );
        md.metadata.namespace = Some("models".to_string());
        md.metadata.uid = Some("uid-1".to_string());
        md
    }

    fn assert_owned(meta: &ObjectMeta) {
        let refs = meta.owner_references.as_ref().unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, "ModelDeployment");
        assert_eq!(refs[0].name, "llama");
        assert_eq!(refs[0].uid, "uid-1");
        assert_eq!(refs[0].controller, Some(true));
        assert_eq!(meta.namespace.as_deref(), Some("models"));
        assert_eq!(
            meta.labels.as_ref().unwrap()[DEPLOYMENT_LABEL],
            "llama".to_string()
        );
    }

    #[test]
    fn test_benchmark_job() {
        let job = benchmark_job(&model_deployment(), "bench:1").unwrap();
        assert_eq!(job.metadata.name.as_deref(), Some("llama-benchmark"));
        assert_owned(&job.metadata);

        let pod = job.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        let container = &pod.containers[0];
        assert_eq!(container.image.as_deref(), Some("bench:1"));
        assert_eq!(
            container.args.as_ref().unwrap(),
            &vec![
                "--model",
                "llama3:8b",
                "--configmap",
                "llama-benchmark-results",
                "--warmup-iterations",
                "3",
                "--min-duration",
                "1m"
            ]
        );
    }

    #[test]
    fn test_storage_claim_sized_from_spec() {
        let claim = storage_claim(&model_deployment()).unwrap();
        assert_eq!(claim.metadata.name.as_deref(), Some("llama"));
        assert_owned(&claim.metadata);
        let requests = claim.spec.unwrap().resources.unwrap().requests.unwrap();
        assert_eq!(requests["storage"], Quantity("1Gi".to_string()));
    }

    #[test]
    fn test_storage_claim_default_size() {
        let mut md = model_deployment();
        md.spec.resources = None;
        let claim = storage_claim(&md).unwrap();
        let requests = claim.spec.unwrap().resources.unwrap().requests.unwrap();
        assert_eq!(requests["storage"], Quantity(DEFAULT_STORAGE_REQUEST.to_string()));
    }

    #[test]
    fn test_workload() {
        let images = ImageResolver::new(
            "default:latest",
            BTreeMap::from([("vllm".to_string(), "vllm:0.6".to_string())]),
        );
        let deployment = workload(&model_deployment(), &images).unwrap();
        assert_owned(&deployment.metadata);

        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(2));
        let pod = spec.template.spec.unwrap();
        let container = &pod.containers[0];
        assert_eq!(container.image.as_deref(), Some("vllm:0.6"));
        assert_eq!(container.ports.as_ref().unwrap()[0].container_port, 11434);

        let requests = container
            .resources
            .as_ref()
            .unwrap()
            .requests
            .as_ref()
            .unwrap();
        assert!(requests.contains_key("cpu"));
        assert!(!requests.contains_key("storage"));

        let volume = &pod.volumes.unwrap()[0];
        assert_eq!(
            volume.persistent_volume_claim.as_ref().unwrap().claim_name,
            "llama"
        );
    }

    #[test]
    fn test_service() {
        let svc = service(&model_deployment()).unwrap();
        assert_owned(&svc.metadata);
        let spec = svc.spec.unwrap();
        let port = &spec.ports.unwrap()[0];
        assert_eq!(port.port, 11434);
        assert_eq!(
            port.target_port,
            Some(IntOrString::String("http".to_string()))
        );
        assert_eq!(spec.selector.unwrap(), selector_labels("llama"));
    }

    #[test]
    fn test_image_resolver_falls_back_to_default() {
        let images = ImageResolver::new("default:latest", BTreeMap::new());
        assert_eq!(images.resolve("ollama"), "default:latest");
    }

    #[test]
    fn test_missing_uid_is_an_error() {
        let mut md = model_deployment();
        md.metadata.uid = None;
        assert!(matches!(
            service(&md),
            Err(Error::MissingObjectKey("metadata.uid"))
        ));
    }
}
