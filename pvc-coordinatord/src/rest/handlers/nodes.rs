//! Node endpoints: `GET /node[/<n>]`, `POST
//! /node/<n>/domain-state`, `POST /node/<n>/coordinator-state`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use pvc_core::entity::node::{CoordinatorState, DomainState};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::rest::{ApiError, AppState};

#[utoipa::path(
    get,
    path = "/v1/node",
    responses((status = 200, description = "List of nodes", body = Vec<pvc_core::entity::node::Node>)),
    tag = "nodes"
)]
pub async fn list(State(state): State<Arc<AppState>>) -> Response {
    match state.registry.list_nodes().await {
        Ok(nodes) => Json(nodes).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1/node/{n}",
    params(("n" = String, Path, description = "Node name")),
    responses(
        (status = 200, description = "Node found", body = pvc_core::entity::node::Node),
        (status = 404, description = "Node not found", body = crate::rest::ApiError)
    ),
    tag = "nodes"
)]
pub async fn get(State(state): State<Arc<AppState>>, Path(node): Path<String>) -> Response {
    match state.registry.get_node(&node).await {
        Ok(node) => Json(node).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetDomainStateRequest {
    pub state: DomainState,
}

/// `POST /node/<n>/domain-state`: request `flush` (evacuate) or `ready`
/// — accepting any table-legal target, not just those two, since
/// `Unflush`/`Flushed` are also reachable requests in the transition
/// table even though `flush`/`ready` are the two a caller normally
/// issues.
#[utoipa::path(
    post,
    path = "/v1/node/{n}/domain-state",
    params(("n" = String, Path, description = "Node name")),
    request_body = SetDomainStateRequest,
    responses(
        (status = 202, description = "Transition accepted"),
        (status = 400, description = "Illegal transition", body = crate::rest::ApiError)
    ),
    tag = "nodes"
)]
pub async fn set_domain_state(
    State(state): State<Arc<AppState>>,
    Path(node): Path<String>,
    Json(req): Json<SetDomainStateRequest>,
) -> Response {
    match state.registry.request_domain_state(&node, req.state).await {
        Ok(()) => axum::http::StatusCode::ACCEPTED.into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetCoordinatorStateRequest {
    pub state: CoordinatorState,
}

/// `POST /node/<n>/coordinator-state`: request a primary handoff (spec
/// §8 scenario S5). See
/// [`crate::registry::ClusterRegistry::request_coordinator_state`] for
/// how `primary` maps onto the `takeover` edge the election driver
/// actually watches.
#[utoipa::path(
    post,
    path = "/v1/node/{n}/coordinator-state",
    params(("n" = String, Path, description = "Node name")),
    request_body = SetCoordinatorStateRequest,
    responses(
        (status = 202, description = "Handoff requested"),
        (status = 400, description = "Illegal transition", body = crate::rest::ApiError)
    ),
    tag = "nodes"
)]
pub async fn set_coordinator_state(
    State(state): State<Arc<AppState>>,
    Path(node): Path<String>,
    Json(req): Json<SetCoordinatorStateRequest>,
) -> Response {
    match state.registry.request_coordinator_state(&node, req.state).await {
        Ok(()) => axum::http::StatusCode::ACCEPTED.into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}
