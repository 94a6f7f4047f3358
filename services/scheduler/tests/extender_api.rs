//! Extender HTTP API, exercised in-process over a primed capability cache.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use flexinfer_api::CapabilityKeys;
use flexinfer_sched::api::create_router;
use flexinfer_sched::cache::CapabilityCache;
use flexinfer_sched::config::DEFAULT_MAX_BODY_BYTES;
use flexinfer_sched::metrics::Metrics;
use flexinfer_sched::score::ScoreWeights;
use flexinfer_sched::state::AppState;
use http_body_util::BodyExt;
use k8s_openapi::api::core::v1::{ConfigMap, Node};
use kube::runtime::{reflector, watcher};
use serde_json::{json, Value};
use tower::ServiceExt;

fn node(value: Value) -> Node {
    serde_json::from_value(value).unwrap()
}

fn cluster_nodes() -> Vec<Node> {
    vec![
        node(json!({
            "metadata": {
                "name": "n1",
                "labels": {"flexinfer.ai/gpu.vendor": "nvidia"},
                "annotations": {"flexinfer.ai/gpu.util": "50", "flexinfer.ai/cost": "5"}
            }
        })),
        node(json!({
            "metadata": {
                "name": "n2",
                "labels": {"flexinfer.ai/cpu.avx512": "true"}
            }
        })),
        node(json!({
            "metadata": {
                "name": "n3",
                "labels": {"flexinfer.ai/gpu.vendor": "amd"},
                "annotations": {"flexinfer.ai/gpu.util": "10", "flexinfer.ai/cost": "2"}
            }
        })),
    ]
}

fn benchmark_result() -> ConfigMap {
    serde_json::from_value(json!({
        "metadata": {"name": "llama-benchmark-results", "namespace": "models"},
        "data": {
            "model": "llama3:8b",
            "tokensPerSecond": "100",
            "timestamp": "2025-06-01T12:00:00Z"
        }
    }))
    .unwrap()
}

async fn app() -> Router {
    app_with_body_limit(DEFAULT_MAX_BODY_BYTES).await
}

async fn app_with_body_limit(max_body_bytes: usize) -> Router {
    let (nodes, mut node_writer) = reflector::store();
    let (config_maps, mut cm_writer) = reflector::store();

    node_writer.apply_watcher_event(&watcher::Event::Init);
    for n in cluster_nodes() {
        node_writer.apply_watcher_event(&watcher::Event::InitApply(n));
    }
    node_writer.apply_watcher_event(&watcher::Event::InitDone);

    cm_writer.apply_watcher_event(&watcher::Event::Init);
    cm_writer.apply_watcher_event(&watcher::Event::InitApply(benchmark_result()));
    cm_writer.apply_watcher_event(&watcher::Event::InitDone);

    let cache = CapabilityCache::from_stores(nodes, config_maps);
    cache
        .wait_for_sync(std::time::Duration::from_secs(1))
        .await
        .unwrap();

    let state = AppState::new(
        cache,
        CapabilityKeys::default(),
        ScoreWeights::default(),
        Arc::new(Metrics::new().unwrap()),
    );
    create_router(state, max_body_bytes)
}

async fn post(app: Router, uri: &str, body: String) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let (status, bytes) = post(app, uri, body.to_string()).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn pod(deployment: &str) -> Value {
    json!({
        "metadata": {
            "name": "llama-7d9f",
            "namespace": "models",
            "labels": {"modeldeployment_cr": deployment}
        }
    })
}

#[tokio::test]
async fn test_filter_admits_gpu_nodes_in_order() {
    let (status, body) = post_json(
        app().await,
        "/filter",
        json!({"pod": pod("llama"), "nodenames": ["n1", "n2", "n3", "n4"]}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["nodenames"], json!(["n1", "n3"]));
    assert_eq!(
        body["failedNodes"],
        json!({
            "n2": "node lacks flexinfer.ai/gpu.vendor label",
            "n4": "node not found in capability cache"
        })
    );
    assert!(body.get("error").is_none());
}

#[tokio::test]
async fn test_filter_echoes_admitted_node_objects() {
    let (status, body) = post_json(
        app().await,
        "/filter",
        json!({
            "pod": pod("llama"),
            "nodes": {"items": [
                {"metadata": {"name": "n1"}, "spec": {"unschedulable": false}},
                {"metadata": {"name": "n2"}}
            ]}
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["nodenames"], json!(["n1"]));
    assert_eq!(
        body["nodes"]["items"],
        json!([{"metadata": {"name": "n1"}, "spec": {"unschedulable": false}}])
    );
}

#[tokio::test]
async fn test_score_ranks_by_weighted_throughput() {
    let (status, body) = post_json(
        app().await,
        "/score",
        json!({"pod": pod("llama"), "nodenames": ["n1", "n3"]}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!([{"host": "n1", "score": 59}, {"host": "n3", "score": 67}])
    );
}

#[tokio::test]
async fn test_score_fails_open_without_result() {
    let app = app().await;
    let (status, body) = post_json(
        app.clone(),
        "/score",
        json!({"pod": pod("mistral"), "nodenames": ["n1", "n3"]}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!([{"host": "n1", "score": 0}, {"host": "n3", "score": 0}])
    );

    let response = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let text = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(text.to_vec()).unwrap();
    assert!(text.contains("flexinfer_score_fail_open_total 1"));
    assert!(text.contains(r#"flexinfer_extender_requests_total{endpoint="score"} 1"#));
}

#[tokio::test]
async fn test_malformed_body_is_rejected() {
    for uri in ["/filter", "/score"] {
        let (status, _) = post(app().await, uri, "{not json".to_string()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
    }
}

/// A NodeList the size kube-scheduler sends for a few hundred real nodes.
fn large_node_list() -> Value {
    let padding = "x".repeat(6 * 1024);
    let mut items = vec![json!({"metadata": {"name": "n1"}})];
    items.extend((0..500).map(|i| {
        json!({
            "metadata": {
                "name": format!("bulk-{i}"),
                "annotations": {"node.alpha.kubernetes.io/ttl": padding}
            }
        })
    }));
    json!({"pod": pod("llama"), "nodes": {"items": items}})
}

#[tokio::test]
async fn test_filter_accepts_full_node_list_above_two_mib() {
    let body = large_node_list().to_string();
    assert!(body.len() > 2 * 1024 * 1024);

    let (status, bytes) = post(app().await, "/filter", body).await;
    assert_eq!(status, StatusCode::OK);

    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["nodenames"], json!(["n1"]));
    assert_eq!(body["nodes"]["items"], json!([{"metadata": {"name": "n1"}}]));
    assert_eq!(body["failedNodes"].as_object().unwrap().len(), 500);
}

#[tokio::test]
async fn test_body_over_configured_limit_is_too_large() {
    let body = large_node_list().to_string();
    for uri in ["/filter", "/score"] {
        let (status, _) = post(app_with_body_limit(64 * 1024).await, uri, body.clone()).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE, "{uri}");
    }
}

#[tokio::test]
async fn test_healthz() {
    let response = app()
        .await
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(body.is_empty());
}
