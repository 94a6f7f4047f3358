//! Score stage: rank nodes by benchmarked throughput, utilization and cost.
//!
//! score = tps * W_tps - util * W_util - cost * W_cost, truncated toward zero.
//! Scores are raw weighted sums; nothing is normalized across nodes.

use flexinfer_api::{
    benchmark_results_name, parse_finite, tokens_per_second_lenient, CapabilityKeys,
    DEPLOYMENT_LABEL,
};
use k8s_openapi::api::core::v1::Node;
use tracing::debug;

use crate::cache::CapabilityCache;
use crate::extender::{HostPriority, PendingPod};

/// Namespace assumed for pods that arrive without one.
pub const DEFAULT_POD_NAMESPACE: &str = "default";

pub const DEFAULT_TPS_WEIGHT: f64 = 0.7;
pub const DEFAULT_UTIL_WEIGHT: f64 = 0.2;
pub const DEFAULT_COST_WEIGHT: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub tps: f64,
    pub util: f64,
    pub cost: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            tps: DEFAULT_TPS_WEIGHT,
            util: DEFAULT_UTIL_WEIGHT,
            cost: DEFAULT_COST_WEIGHT,
        }
    }
}

/// Weighted sum, truncated toward zero. Out-of-range values saturate.
pub fn weighted_score(tps: f64, util: f64, cost: f64, weights: &ScoreWeights) -> i64 {
    (tps * weights.tps - util * weights.util - cost * weights.cost) as i64
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoreOutcome {
    /// One entry per candidate, in input order.
    pub scores: Vec<HostPriority>,

    /// No benchmark result was found, so every candidate scored 0.
    pub fail_open: bool,
}

/// Score candidates for `pod`.
pub fn score_nodes(
    cache: &CapabilityCache,
    keys: &CapabilityKeys,
    weights: &ScoreWeights,
    pod: &PendingPod,
    candidates: &[String],
) -> ScoreOutcome {
    let result = pod.label(DEPLOYMENT_LABEL).and_then(|deployment| {
        let namespace = pod.namespace().unwrap_or(DEFAULT_POD_NAMESPACE);
        cache.get_config_object(namespace, &benchmark_results_name(deployment))
    });

    let Some(result) = result else {
        debug!(
            pod = pod.metadata.name.as_deref().unwrap_or("unknown"),
            "no benchmark result for pod, scoring every node 0"
        );
        return ScoreOutcome {
            scores: candidates
                .iter()
                .map(|host| HostPriority {
                    host: host.clone(),
                    score: 0,
                })
                .collect(),
            fail_open: true,
        };
    };

    let tps = tokens_per_second_lenient(result.data.as_ref());
    let scores = candidates
        .iter()
        .map(|host| {
            let node = cache.get_node(host);
            let util = annotation(node.as_deref(), &keys.gpu_util);
            let cost = annotation(node.as_deref(), &keys.cost);
            let score = weighted_score(tps, util, cost, weights);
            debug!(node = %host, tps, util, cost, score, "scored node");
            HostPriority {
                host: host.clone(),
                score,
            }
        })
        .collect();

    ScoreOutcome {
        scores,
        fail_open: false,
    }
}

/// Numeric annotation value, or 0 when the node, key or number is missing.
fn annotation(node: Option<&Node>, key: &str) -> f64 {
    node.and_then(|n| n.metadata.annotations.as_ref())
        .and_then(|a| a.get(key))
        .and_then(|raw| parse_finite(raw))
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::runtime::{reflector, watcher};
    use rstest::rstest;

    fn node(name: &str, util: &str, cost: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                annotations: Some(
                    [
                        ("flexinfer.ai/gpu.util".to_string(), util.to_string()),
                        ("flexinfer.ai/cost".to_string(), cost.to_string()),
                    ]
                    .into(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn result(ns: &str, deployment: &str, tps: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(format!("{deployment}-benchmark-results")),
                namespace: Some(ns.to_string()),
                ..Default::default()
            },
            data: Some([("tokensPerSecond".to_string(), tps.to_string())].into()),
            ..Default::default()
        }
    }

    fn pod(ns: Option<&str>, deployment: Option<&str>) -> PendingPod {
        PendingPod {
            metadata: ObjectMeta {
                name: Some("llama-0".to_string()),
                namespace: ns.map(str::to_string),
                labels: deployment
                    .map(|d| [(DEPLOYMENT_LABEL.to_string(), d.to_string())].into()),
                ..Default::default()
            },
        }
    }

    fn cache(nodes: Vec<Node>, config_maps: Vec<ConfigMap>) -> CapabilityCache {
        let (node_store, mut node_writer) = reflector::store();
        let (cm_store, mut cm_writer) = reflector::store();
        for n in nodes {
            node_writer.apply_watcher_event(&watcher::Event::Apply(n));
        }
        for cm in config_maps {
            cm_writer.apply_watcher_event(&watcher::Event::Apply(cm));
        }
        CapabilityCache::from_stores(node_store, cm_store)
    }

    fn candidates() -> Vec<String> {
        vec!["a".to_string(), "b".to_string()]
    }

    #[rstest]
    #[case(100.0, 50.0, 5.0, 59)]
    #[case(100.0, 10.0, 2.0, 67)]
    #[case(0.0, 0.0, 0.0, 0)]
    #[case(0.0, 10.0, 0.0, -2)]
    #[case(0.0, 0.0, 1.0, 0)] // -0.1 truncates to 0
    #[case(f64::NAN, 0.0, 0.0, 0)]
    #[case(f64::MAX, 0.0, 0.0, i64::MAX)]
    fn test_weighted_score(
        #[case] tps: f64,
        #[case] util: f64,
        #[case] cost: f64,
        #[case] expected: i64,
    ) {
        assert_eq!(weighted_score(tps, util, cost, &ScoreWeights::default()), expected);
    }

    #[test]
    fn test_scores_in_input_order() {
        let cache = cache(
            vec![node("a", "50", "5"), node("b", "10", "2")],
            vec![result("models", "llama", "100")],
        );
        let outcome = score_nodes(
            &cache,
            &CapabilityKeys::default(),
            &ScoreWeights::default(),
            &pod(Some("models"), Some("llama")),
            &candidates(),
        );
        assert!(!outcome.fail_open);
        assert_eq!(
            outcome.scores,
            vec![
                HostPriority {
                    host: "a".to_string(),
                    score: 59
                },
                HostPriority {
                    host: "b".to_string(),
                    score: 67
                },
            ]
        );
    }

    #[rstest]
    #[case::no_label(pod(Some("models"), None))]
    #[case::no_result(pod(Some("models"), Some("mistral")))]
    #[case::wrong_namespace(pod(Some("other"), Some("llama")))]
    fn test_fail_open(#[case] pending: PendingPod) {
        let cache = cache(
            vec![node("a", "50", "5"), node("b", "10", "2")],
            vec![result("models", "llama", "100")],
        );
        let outcome = score_nodes(
            &cache,
            &CapabilityKeys::default(),
            &ScoreWeights::default(),
            &pending,
            &candidates(),
        );
        assert!(outcome.fail_open);
        assert!(outcome.scores.iter().all(|s| s.score == 0));
        assert_eq!(outcome.scores.len(), 2);
    }

    #[test]
    fn test_pod_without_namespace_uses_default() {
        let cache = cache(vec![], vec![result("default", "llama", "100")]);
        let outcome = score_nodes(
            &cache,
            &CapabilityKeys::default(),
            &ScoreWeights::default(),
            &pod(None, Some("llama")),
            &candidates(),
        );
        assert!(!outcome.fail_open);
        // Unknown nodes count as zero utilization and cost.
        assert!(outcome.scores.iter().all(|s| s.score == 70));
    }

    #[test]
    fn test_unparsable_values_default_to_zero() {
        let cache = cache(
            vec![node("a", "busy", "5"), node("b", "10", "")],
            vec![result("models", "llama", "not-a-number")],
        );
        let outcome = score_nodes(
            &cache,
            &CapabilityKeys::default(),
            &ScoreWeights::default(),
            &pod(Some("models"), Some("llama")),
            &candidates(),
        );
        assert!(!outcome.fail_open);
        // a: 0 - 0 - 0.5, b: 0 - 2 - 0
        assert_eq!(outcome.scores[0].score, 0);
        assert_eq!(outcome.scores[1].score, -2);
    }
}
