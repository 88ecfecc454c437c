//! HTTP Adapter: a thin translation layer over the
//! core. Handlers call straight into `pvc-core` operations and the
//! registry and serialize the result; no business logic lives here.

pub mod handlers;
pub mod routes;

use std::collections::HashSet;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pvc_core::error::PvcError;
use pvc_core::tasks::TaskBus;
use serde::Serialize;
use utoipa::ToSchema;

use crate::registry::ClusterRegistry;

/// Shared application state handed to every handler. Migration,
/// placement and fencing execution all happen on the node daemon that
/// owns the affected domain — the HTTP adapter only ever mutates
/// coordination state directly or enqueues a task.
pub struct AppState {
    pub registry: Arc<ClusterRegistry>,
    pub tasks: Arc<TaskBus>,
    pub api_keys: HashSet<String>,
    pub audit: Arc<pvc_log::AuditLogger>,
}

/// Mirrors the teacher's `StoreError -> ApiError` conversion
/// (`mvirt-api::rest::handlers::mod::ApiError`) field-for-field,
/// generalized to `PvcError`'s additional `CoordinationLost` and
/// `FenceFailure` kinds.
#[derive(Serialize, ToSchema)]
pub struct ApiError {
    pub error: String,
    pub code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

impl From<PvcError> for ApiError {
    fn from(e: PvcError) -> Self {
        ApiError { code: e.status_code(), error: e.to_string() }
    }
}
