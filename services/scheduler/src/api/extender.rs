//! `/filter` and `/score` handlers.

use std::collections::HashSet;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use tracing::{error, instrument, warn};

use super::error::ApiError;
use crate::extender::{node_name, ExtenderArgs, ExtenderFilterResult, NodeItems};
use crate::filter::filter_nodes;
use crate::score::score_nodes;
use crate::state::AppState;

pub fn routes(max_body_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/filter", post(filter))
        .route("/score", post(score))
        .layer(DefaultBodyLimit::max(max_body_bytes))
}

#[instrument(skip_all)]
async fn filter(
    State(state): State<AppState>,
    body: Result<Json<ExtenderArgs>, JsonRejection>,
) -> Result<Response, ApiError> {
    state.metrics().observe_request("filter");
    let Json(args) = body.map_err(bad_body)?;

    let candidates = args.candidates();
    let outcome = filter_nodes(state.cache(), state.keys(), &candidates);
    for (_, reason) in &outcome.rejected {
        state.metrics().observe_rejection(*reason);
    }

    let admitted: HashSet<&str> = outcome.admitted.iter().map(String::as_str).collect();
    let nodes = args.nodes.map(|list| NodeItems {
        items: list
            .items
            .into_iter()
            .filter(|n| node_name(n).is_some_and(|name| admitted.contains(name)))
            .collect(),
    });

    let result = ExtenderFilterResult {
        nodes,
        nodenames: Some(outcome.admitted.clone()),
        failed_nodes: outcome.failed_nodes(state.keys()),
        error: String::new(),
    };
    encode(&result)
}

#[instrument(skip_all)]
async fn score(
    State(state): State<AppState>,
    body: Result<Json<ExtenderArgs>, JsonRejection>,
) -> Result<Response, ApiError> {
    state.metrics().observe_request("score");
    let Json(args) = body.map_err(bad_body)?;

    let candidates = args.candidates();
    let outcome = score_nodes(
        state.cache(),
        state.keys(),
        state.weights(),
        &args.pod,
        &candidates,
    );
    if outcome.fail_open {
        state.metrics().observe_fail_open();
    }
    encode(&outcome.scores)
}

fn bad_body(rejection: JsonRejection) -> ApiError {
    warn!(error = %rejection.body_text(), "rejected extender request body");
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::payload_too_large("body_too_large", rejection.body_text());
    }
    ApiError::bad_request("invalid_body", rejection.body_text())
}

fn encode<T: Serialize>(value: &T) -> Result<Response, ApiError> {
    let body = serde_json::to_vec(value).map_err(|e| {
        error!(error = %e, "failed to encode extender response");
        ApiError::internal("response_encoding", "failed to encode response")
    })?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}
