//! Storage endpoints: `POST /storage/ceph/osd` enqueues
//! `osd.add` on the target node (OSD creation touches the node's local
//! block devices, so it's executed there, never by the coordinator);
//! pool/volume/snapshot are plain coordination-state CRUD since they
//! describe Ceph objects the coordinator only needs to track, not
//! create (creation itself happens as a task too, via the same
//! `osd.add`-style routing, kept out of scope here — see `DESIGN.md`
//! for the OSD removal `force_flag` semantics).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use pvc_core::entity::storage::{Osd, Pool, StorageSnapshot, Volume};
use serde::Deserialize;
use utoipa::ToSchema;
use serde_json::Map;

use super::TaskAccepted;
use crate::rest::{ApiError, AppState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddOsdRequest {
    pub node: String,
    pub data_device: String,
    #[serde(default)]
    pub db_device: Option<String>,
    #[serde(default)]
    pub split_count: Option<u32>,
}

/// `POST /storage/ceph/osd`: enqueues `osd.add` on the owning node.
#[utoipa::path(
    post,
    path = "/v1/storage/ceph/osd",
    request_body = AddOsdRequest,
    responses(
        (status = 202, description = "Task accepted", body = TaskAccepted),
        (status = 404, description = "Node not found", body = crate::rest::ApiError)
    ),
    tag = "storage"
)]
pub async fn add_osd(State(state): State<Arc<AppState>>, Json(req): Json<AddOsdRequest>) -> Response {
    match add_osd_inner(&state, req).await {
        Ok(accepted) => {
            let location = format!("/api/v1/tasks/{}", accepted.task_id);
            (StatusCode::ACCEPTED, [(header::LOCATION, location)], Json(accepted)).into_response()
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

async fn add_osd_inner(state: &AppState, req: AddOsdRequest) -> Result<TaskAccepted, pvc_core::PvcError> {
    state.registry.get_node(&req.node).await?;

    let mut kwargs = Map::new();
    kwargs.insert("data_device".into(), req.data_device.into());
    if let Some(db) = req.db_device {
        kwargs.insert("db_device".into(), db.into());
    }
    if let Some(split) = req.split_count {
        kwargs.insert("split_count".into(), split.into());
    }

    let task_id = state.tasks.submit("osd.add", kwargs, &req.node).await?;
    Ok(TaskAccepted { task_id, task_name: "osd.add".to_string(), run_on: req.node })
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RemoveOsdQuery {
    #[serde(default)]
    pub force: bool,
}

/// `DELETE /storage/ceph/osd/<id>`: enqueues `osd.remove`. `force`
/// bypasses the "OSD currently `up`/`in`" guard that would otherwise
/// reject removal (see `DESIGN.md`).
#[utoipa::path(
    delete,
    path = "/v1/storage/ceph/osd/{id}",
    params(
        ("id" = String, Path, description = "OSD id"),
        ("force" = Option<bool>, Query, description = "Bypass the up/in guard")
    ),
    responses(
        (status = 202, description = "Task accepted", body = TaskAccepted),
        (status = 400, description = "OSD is up/in", body = crate::rest::ApiError),
        (status = 404, description = "OSD not found", body = crate::rest::ApiError)
    ),
    tag = "storage"
)]
pub async fn remove_osd(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    axum::extract::Query(query): axum::extract::Query<RemoveOsdQuery>,
) -> Response {
    match remove_osd_inner(&state, &id, query.force).await {
        Ok(accepted) => {
            let location = format!("/api/v1/tasks/{}", accepted.task_id);
            (StatusCode::ACCEPTED, [(header::LOCATION, location)], Json(accepted)).into_response()
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

async fn remove_osd_inner(state: &AppState, id: &str, force: bool) -> Result<TaskAccepted, pvc_core::PvcError> {
    let osd = state.registry.get_osd(id).await?;
    if !force && (osd.stats.up || osd.stats.in_cluster) {
        return Err(pvc_core::PvcError::Precondition(
            "OSD is up/in; pass force=true to remove anyway".to_string(),
        ));
    }

    let mut kwargs = Map::new();
    kwargs.insert("osd_id".into(), id.into());
    kwargs.insert("force".into(), force.into());
    let task_id = state.tasks.submit("osd.remove", kwargs, &osd.node).await?;
    Ok(TaskAccepted { task_id, task_name: "osd.remove".to_string(), run_on: osd.node })
}

#[utoipa::path(get, path = "/v1/storage/ceph/osd", responses((status = 200, body = Vec<Osd>)), tag = "storage")]
pub async fn list_osds(State(state): State<Arc<AppState>>) -> Response {
    match state.registry.list_osds().await {
        Ok(osds) => Json(osds).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1/storage/ceph/osd/{id}",
    params(("id" = String, Path, description = "OSD id")),
    responses(
        (status = 200, body = Osd),
        (status = 404, body = crate::rest::ApiError)
    ),
    tag = "storage"
)]
pub async fn get_osd(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.registry.get_osd(&id).await {
        Ok(osd) => Json(osd).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[utoipa::path(get, path = "/v1/storage/ceph/pool", responses((status = 200, body = Vec<Pool>)), tag = "storage")]
pub async fn list_pools(State(state): State<Arc<AppState>>) -> Response {
    match state.registry.list_pools().await {
        Ok(pools) => Json(pools).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/storage/ceph/pool",
    request_body = Pool,
    responses((status = 201, body = Pool)),
    tag = "storage"
)]
pub async fn put_pool(State(state): State<Arc<AppState>>, Json(pool): Json<Pool>) -> Response {
    match state.registry.put_pool(&pool).await {
        Ok(()) => (StatusCode::CREATED, Json(pool)).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1/storage/ceph/pool/{name}",
    params(("name" = String, Path, description = "Pool name")),
    responses((status = 200, body = Pool), (status = 404, body = crate::rest::ApiError)),
    tag = "storage"
)]
pub async fn get_pool(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> Response {
    match state.registry.get_pool(&name).await {
        Ok(pool) => Json(pool).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/storage/ceph/pool/{name}",
    params(("name" = String, Path, description = "Pool name")),
    responses((status = 204), (status = 404, body = crate::rest::ApiError)),
    tag = "storage"
)]
pub async fn delete_pool(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> Response {
    match state.registry.delete_pool(&name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[utoipa::path(get, path = "/v1/storage/ceph/volume", responses((status = 200, body = Vec<Volume>)), tag = "storage")]
pub async fn list_volumes(State(state): State<Arc<AppState>>) -> Response {
    match state.registry.list_volumes().await {
        Ok(volumes) => Json(volumes).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

fn volume_key(pool: &str, name: &str) -> String {
    format!("{pool}/{name}")
}

#[utoipa::path(
    post,
    path = "/v1/storage/ceph/volume",
    request_body = Volume,
    responses((status = 201, body = Volume)),
    tag = "storage"
)]
pub async fn put_volume(State(state): State<Arc<AppState>>, Json(volume): Json<Volume>) -> Response {
    let key = volume_key(&volume.pool, &volume.name);
    match state.registry.put_volume(&key, &volume).await {
        Ok(()) => (StatusCode::CREATED, Json(volume)).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1/storage/ceph/volume/{pool}/{name}",
    params(("pool" = String, Path), ("name" = String, Path)),
    responses((status = 200, body = Volume), (status = 404, body = crate::rest::ApiError)),
    tag = "storage"
)]
pub async fn get_volume(State(state): State<Arc<AppState>>, Path((pool, name)): Path<(String, String)>) -> Response {
    match state.registry.get_volume(&volume_key(&pool, &name)).await {
        Ok(volume) => Json(volume).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/storage/ceph/volume/{pool}/{name}",
    params(("pool" = String, Path), ("name" = String, Path)),
    responses((status = 204), (status = 404, body = crate::rest::ApiError)),
    tag = "storage"
)]
pub async fn delete_volume(State(state): State<Arc<AppState>>, Path((pool, name)): Path<(String, String)>) -> Response {
    match state.registry.delete_volume(&volume_key(&pool, &name)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[utoipa::path(get, path = "/v1/storage/ceph/snapshot", responses((status = 200, body = Vec<StorageSnapshot>)), tag = "storage")]
pub async fn list_snapshots(State(state): State<Arc<AppState>>) -> Response {
    match state.registry.list_snapshots().await {
        Ok(snapshots) => Json(snapshots).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

fn snapshot_key(pool: &str, volume: &str, name: &str) -> String {
    format!("{pool}/{volume}/{name}")
}

#[utoipa::path(
    post,
    path = "/v1/storage/ceph/snapshot",
    request_body = StorageSnapshot,
    responses((status = 201, body = StorageSnapshot)),
    tag = "storage"
)]
pub async fn put_snapshot(State(state): State<Arc<AppState>>, Json(snapshot): Json<StorageSnapshot>) -> Response {
    let key = snapshot_key(&snapshot.pool, &snapshot.volume, &snapshot.name);
    match state.registry.put_snapshot(&key, &snapshot).await {
        Ok(()) => (StatusCode::CREATED, Json(snapshot)).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/storage/ceph/snapshot/{pool}/{volume}/{name}",
    params(("pool" = String, Path), ("volume" = String, Path), ("name" = String, Path)),
    responses((status = 204), (status = 404, body = crate::rest::ApiError)),
    tag = "storage"
)]
pub async fn delete_snapshot(
    State(state): State<Arc<AppState>>,
    Path((pool, volume, name)): Path<(String, String, String)>,
) -> Response {
    match state.registry.delete_snapshot(&snapshot_key(&pool, &volume, &name)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}
