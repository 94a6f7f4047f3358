//! Filter stage: admit only nodes that advertise a GPU vendor.

use std::collections::BTreeMap;

use flexinfer_api::CapabilityKeys;
use tracing::debug;

use crate::cache::CapabilityCache;

/// Why a candidate was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NotInCache,
    NoGpuVendor,
}

impl Rejection {
    /// Metric label value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotInCache => "not_in_cache",
            Self::NoGpuVendor => "no_gpu_vendor",
        }
    }

    /// Reason reported to the scheduler in `failedNodes`.
    pub fn message(&self, keys: &CapabilityKeys) -> String {
        match self {
            Self::NotInCache => "node not found in capability cache".to_string(),
            Self::NoGpuVendor => format!("node lacks {} label", keys.gpu_vendor),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOutcome {
    /// Admitted names, in input order.
    pub admitted: Vec<String>,
    pub rejected: Vec<(String, Rejection)>,
}

impl FilterOutcome {
    /// `failedNodes` map for the response.
    pub fn failed_nodes(&self, keys: &CapabilityKeys) -> BTreeMap<String, String> {
        self.rejected
            .iter()
            .map(|(node, reason)| (node.clone(), reason.message(keys)))
            .collect()
    }
}

/// Split candidates into admitted and rejected.
///
/// A node is admitted when its labels contain the GPU vendor key, whatever
/// the value.
pub fn filter_nodes(
    cache: &CapabilityCache,
    keys: &CapabilityKeys,
    candidates: &[String],
) -> FilterOutcome {
    let mut outcome = FilterOutcome::default();
    for name in candidates {
        let verdict = match cache.get_node(name) {
            None => Err(Rejection::NotInCache),
            Some(node) => {
                let has_vendor = node
                    .metadata
                    .labels
                    .as_ref()
                    .is_some_and(|labels| labels.contains_key(&keys.gpu_vendor));
                if has_vendor {
                    Ok(())
                } else {
                    Err(Rejection::NoGpuVendor)
                }
            }
        };

        match verdict {
            Ok(()) => outcome.admitted.push(name.clone()),
            Err(reason) => {
                debug!(node = %name, reason = reason.as_str(), "node rejected");
                outcome.rejected.push((name.clone(), reason));
            }
        }
    }
    outcome
}
