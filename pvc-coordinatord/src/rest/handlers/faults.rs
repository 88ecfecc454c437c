//! Fault endpoints: `GET /faults`, `GET /faults/<id>`,
//! `PUT /faults/<id>/ack`, `DELETE /faults/<id>`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use pvc_core::health::{sort_faults, FaultSortKey};
use serde::Deserialize;

use crate::rest::{ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct ListFaultsQuery {
    pub sort: Option<FaultSortKey>,
    #[serde(default)]
    pub descending: bool,
}

/// `GET /faults`: listed sorted per the requested key, defaulting to
/// `last_reported` descending.
#[utoipa::path(
    get,
    path = "/v1/faults",
    params(
        ("sort" = Option<FaultSortKey>, Query, description = "Sort key"),
        ("descending" = Option<bool>, Query, description = "Reverse the sort order")
    ),
    responses((status = 200, description = "List of faults", body = Vec<pvc_core::entity::fault::Fault>)),
    tag = "faults"
)]
pub async fn list(State(state): State<Arc<AppState>>, Query(query): Query<ListFaultsQuery>) -> Response {
    match state.registry.list_faults().await {
        Ok(mut faults) => {
            let key = query.sort.unwrap_or(FaultSortKey::LastReported);
            let descending = query.sort.is_none() || query.descending;
            sort_faults(&mut faults, key, descending);
            Json(faults).into_response()
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1/faults/{id}",
    params(("id" = String, Path, description = "Fault id (content hash)")),
    responses(
        (status = 200, description = "Fault found", body = pvc_core::entity::fault::Fault),
        (status = 404, description = "Fault not found", body = crate::rest::ApiError)
    ),
    tag = "faults"
)]
pub async fn get(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.registry.get_fault(&id).await {
        Ok(fault) => Json(fault).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// `PUT /faults/<id>/ack`: acknowledges a fault in place without clearing it. Idempotent — acking an
/// already-acked fault just re-stamps `acknowledged_at`. A later recurrence of the same underlying
/// condition (`re_report`) does not reset `status` back to `new`; it stays `ack` until explicitly deleted.
#[utoipa::path(
    put,
    path = "/v1/faults/{id}/ack",
    params(("id" = String, Path, description = "Fault id (content hash)")),
    responses(
        (status = 200, description = "Fault acknowledged", body = pvc_core::entity::fault::Fault),
        (status = 404, description = "Fault not found", body = crate::rest::ApiError)
    ),
    tag = "faults"
)]
pub async fn ack(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.registry.acknowledge_fault(&id).await {
        Ok(fault) => Json(fault).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/faults/{id}",
    params(("id" = String, Path, description = "Fault id (content hash)")),
    responses(
        (status = 204, description = "Fault deleted"),
        (status = 404, description = "Fault not found", body = crate::rest::ApiError)
    ),
    tag = "faults"
)]
pub async fn delete(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.registry.delete_fault(&id).await {
        Ok(()) => axum::http::StatusCode::NO_CONTENT.into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}
