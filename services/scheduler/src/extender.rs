//! Wire types of the kube-scheduler extender protocol.
//!
//! Field names follow the scheduler's `extender/v1` JSON encoding. The
//! scheduler sends either node names (when `nodeCacheCapable` is set) or a
//! full `NodeList`; full node objects are echoed back untouched.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// The pod being scheduled. Only its metadata matters to this extender.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PendingPod {
    #[serde(default)]
    pub metadata: ObjectMeta,
}

impl PendingPod {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata.labels.as_ref()?.get(key).map(String::as_str)
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref().filter(|ns| !ns.is_empty())
    }
}

/// `NodeList` as sent by the scheduler. Items are kept as raw JSON so they
/// can be returned exactly as received.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeItems {
    #[serde(default)]
    pub items: Vec<serde_json::Value>,
}

/// Body of both `/filter` and `/score`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtenderArgs {
    #[serde(default)]
    pub pod: PendingPod,

    #[serde(default)]
    pub nodes: Option<NodeItems>,

    #[serde(default, alias = "nodeNames")]
    pub nodenames: Option<Vec<String>>,
}

impl ExtenderArgs {
    /// Candidate node names, preferring `nodenames` over `nodes`.
    pub fn candidates(&self) -> Vec<String> {
        if let Some(names) = &self.nodenames {
            return names.clone();
        }
        self.nodes
            .iter()
            .flat_map(|list| list.items.iter())
            .filter_map(node_name)
            .map(str::to_string)
            .collect()
    }
}

/// `metadata.name` of a raw node object.
pub fn node_name(node: &serde_json::Value) -> Option<&str> {
    node.pointer("/metadata/name")?.as_str()
}

/// Response to `/filter`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtenderFilterResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<NodeItems>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodenames: Option<Vec<String>>,

    #[serde(rename = "failedNodes", default)]
    pub failed_nodes: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// One entry of the `/score` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostPriority {
    pub host: String,
    pub score: i64,
}
