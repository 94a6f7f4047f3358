//! In-memory view of nodes and ConfigMaps.
//!
//! Two reflectors keep the stores fresh in the background. Construction
//! waits for both initial listings, after which every read is served from
//! memory. The stores have a single writer each (its reflector) and any
//! number of readers.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Node};
use kube::runtime::reflector::{store::Writer, ObjectRef, Store};
use kube::runtime::{reflector, watcher, WatchStreamExt};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("capability cache did not sync within {0:?}")]
    Timeout(Duration),

    #[error("{0} watch stopped before the initial listing completed")]
    StreamEnded(&'static str),
}

/// Read-only cached view of nodes and benchmark result objects.
pub struct CapabilityCache {
    nodes: Store<Node>,
    config_maps: Store<ConfigMap>,
    tasks: Vec<JoinHandle<()>>,
}

impl CapabilityCache {
    /// Start watching nodes and ConfigMaps cluster-wide and wait for both
    /// initial listings, up to `sync_timeout`.
    pub async fn connect(client: Client, sync_timeout: Duration) -> Result<Self, CacheError> {
        let (nodes, node_writer) = reflector::store();
        let (config_maps, cm_writer) = reflector::store();

        let tasks = vec![
            tokio::spawn(reflect(Api::<Node>::all(client.clone()), node_writer, "nodes")),
            tokio::spawn(reflect(Api::<ConfigMap>::all(client), cm_writer, "configmaps")),
        ];

        let cache = Self {
            nodes,
            config_maps,
            tasks,
        };
        cache.wait_for_sync(sync_timeout).await?;
        info!(
            nodes = cache.nodes.state().len(),
            config_maps = cache.config_maps.state().len(),
            "capability cache synced"
        );
        Ok(cache)
    }

    /// Build a cache over stores fed by someone else.
    pub fn from_stores(nodes: Store<Node>, config_maps: Store<ConfigMap>) -> Self {
        Self {
            nodes,
            config_maps,
            tasks: Vec::new(),
        }
    }

    /// Block until both stores have seen their initial listing.
    pub async fn wait_for_sync(&self, timeout: Duration) -> Result<(), CacheError> {
        let ready = async {
            self.nodes
                .wait_until_ready()
                .await
                .map_err(|_| CacheError::StreamEnded("nodes"))?;
            self.config_maps
                .wait_until_ready()
                .await
                .map_err(|_| CacheError::StreamEnded("configmaps"))
        };
        tokio::time::timeout(timeout, ready)
            .await
            .map_err(|_| CacheError::Timeout(timeout))?
    }

    pub fn get_node(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes.get(&ObjectRef::new(name))
    }

    pub fn get_config_object(&self, namespace: &str, name: &str) -> Option<Arc<ConfigMap>> {
        self.config_maps.get(&ObjectRef::new(name).within(namespace))
    }

    pub fn list_nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.state()
    }

    /// Number of cached nodes carrying `label`, whatever its value.
    pub fn count_labelled(&self, label: &str) -> usize {
        self.list_nodes()
            .iter()
            .filter(|n| {
                n.metadata
                    .labels
                    .as_ref()
                    .is_some_and(|labels| labels.contains_key(label))
            })
            .count()
    }
}

impl Drop for CapabilityCache {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn reflect<K>(api: Api<K>, writer: Writer<K>, kind: &'static str)
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    debug!(kind, "starting reflector");
    reflector(writer, watcher(api, watcher::Config::default()))
        .default_backoff()
        .touched_objects()
        .for_each(|res| {
            match res {
                Ok(obj) => trace!(
                    kind,
                    name = obj.meta().name.as_deref().unwrap_or("unknown"),
                    "cache updated"
                ),
                Err(e) => warn!(kind, error = %e, "reflector error"),
            }
            futures_util::future::ready(())
        })
        .await;
    warn!(kind, "reflector stream ended");
}
