//! VM (Domain) endpoints: `POST /vm` (define), `POST
//! /vm/<vm>/state`, `POST /vm/<vm>/node` (move/migrate/unmigrate),
//! `POST /vm/<vm>/locks` (enqueues `vm.flush_locks`).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use pvc_core::entity::domain::{Domain, DomainRunState, DomainSnapshot, MigrationMethod, Tag};
use pvc_core::placement::Selector;
use pvc_core::state_machine;
use serde::{Deserialize, Serialize};
use serde_json::Map;
use utoipa::ToSchema;

use super::TaskAccepted;
use crate::rest::{ApiError, AppState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct DefineVmRequest {
    pub uuid: Option<String>,
    pub name: String,
    pub xml: String,
    pub node: String,
    #[serde(default)]
    pub node_limit: Vec<String>,
    #[serde(default = "default_selector")]
    pub node_selector: Selector,
    #[serde(default)]
    pub node_autostart: bool,
    #[serde(default = "default_migration_method")]
    pub migration_method: MigrationMethod,
    #[serde(default)]
    pub migration_max_downtime_ms: u64,
    #[serde(default)]
    pub profile: String,
}

fn default_selector() -> Selector {
    Selector::None
}

fn default_migration_method() -> MigrationMethod {
    MigrationMethod::Live
}

/// `POST /vm`: define a new VM. Validated and rejected before it ever
/// touches coordination state; starts in
/// `state=stop` on its declared node.
#[utoipa::path(
    post,
    path = "/v1/vm",
    request_body = DefineVmRequest,
    responses(
        (status = 201, description = "VM defined", body = Domain),
        (status = 400, description = "Validation failed", body = crate::rest::ApiError),
        (status = 404, description = "Node not found", body = crate::rest::ApiError)
    ),
    tag = "vms"
)]
pub async fn define(State(state): State<Arc<AppState>>, Json(req): Json<DefineVmRequest>) -> Response {
    match define_inner(&state, req).await {
        Ok(domain) => (StatusCode::CREATED, Json(domain)).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

async fn define_inner(state: &AppState, req: DefineVmRequest) -> Result<Domain, pvc_core::PvcError> {
    if req.name.trim().is_empty() {
        return Err(pvc_core::PvcError::Validation("vm name must not be empty".to_string()));
    }
    if !req.node_limit.is_empty() && !req.node_limit.contains(&req.node) {
        return Err(pvc_core::PvcError::Validation(
            "node must be a member of node_limit when node_limit is set".to_string(),
        ));
    }
    state.registry.get_node(&req.node).await?;

    let domain = Domain {
        uuid: req.uuid.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        name: req.name,
        xml: req.xml,
        state: DomainRunState::Stop,
        node: req.node,
        last_node: None,
        failed_reason: None,
        node_limit: req.node_limit,
        node_selector: req.node_selector,
        node_autostart: req.node_autostart,
        migration_method: req.migration_method,
        migration_max_downtime_ms: req.migration_max_downtime_ms,
        profile: req.profile,
        tags: Vec::<Tag>::new(),
        snapshots: Vec::<DomainSnapshot>::new(),
    };
    state.registry.put_domain(&domain).await?;
    Ok(domain)
}

#[utoipa::path(
    get,
    path = "/v1/vm/{vm}",
    params(("vm" = String, Path, description = "VM uuid")),
    responses(
        (status = 200, description = "VM found", body = Domain),
        (status = 404, description = "VM not found", body = crate::rest::ApiError)
    ),
    tag = "vms"
)]
pub async fn get(State(state): State<Arc<AppState>>, Path(vm): Path<String>) -> Response {
    match state.registry.get_domain(&vm).await {
        Ok(domain) => Json(domain).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1/vm",
    responses((status = 200, description = "List of VMs", body = Vec<Domain>)),
    tag = "vms"
)]
pub async fn list(State(state): State<Arc<AppState>>) -> Response {
    match state.registry.list_domains().await {
        Ok(domains) => Json(domains).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetStateRequest {
    pub state: DomainRunState,
}

/// `POST /vm/<vm>/state`: requests a power-state transition. The target
/// state is written to coordination state; the owning node's worker
/// converges it. Undefined/unknown transitions are
/// rejected as a `Precondition`.
#[utoipa::path(
    post,
    path = "/v1/vm/{vm}/state",
    params(("vm" = String, Path, description = "VM uuid")),
    request_body = SetStateRequest,
    responses(
        (status = 200, description = "State updated", body = Domain),
        (status = 400, description = "Illegal transition", body = crate::rest::ApiError),
        (status = 404, description = "VM not found", body = crate::rest::ApiError)
    ),
    tag = "vms"
)]
pub async fn set_state(
    State(state): State<Arc<AppState>>,
    Path(vm): Path<String>,
    Json(req): Json<SetStateRequest>,
) -> Response {
    match set_state_inner(&state, &vm, req.state).await {
        Ok(domain) => Json(domain).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

async fn set_state_inner(
    state: &AppState,
    vm: &str,
    target: DomainRunState,
) -> Result<Domain, pvc_core::PvcError> {
    let mut domain = state.registry.get_domain(vm).await?;
    validate_domain_run_transition(domain.state, target)?;
    domain.state = target;
    state.registry.put_domain(&domain).await?;
    Ok(domain)
}

/// `state` here is the VM power state, distinct from
/// the per-node `domain_state` flush/ready dimension
/// `pvc_core::state_machine` validates — kept as a separate, narrower
/// table since not every `DomainRunState` pair is a meaningful request
/// a caller may issue directly (e.g. `fail` is only ever set by the node
/// daemon itself).
fn validate_domain_run_transition(from: DomainRunState, to: DomainRunState) -> Result<(), pvc_core::PvcError> {
    use DomainRunState::*;
    let ok = match to {
        Start => matches!(from, Stop | Shutdown | Restart | Disable),
        Stop | Shutdown => matches!(from, Start | Restart),
        Restart => from == Start,
        Disable => matches!(from, Stop | Shutdown),
        _ => true, // migrate/unmigrate/provision/import/restore/mirror/fail are driven internally
    };
    if ok {
        Ok(())
    } else {
        Err(pvc_core::PvcError::Precondition(format!(
            "illegal vm state transition {from:?} -> {to:?}"
        )))
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum NodeActionRequest {
    Migrate { node: String, #[serde(default)] force: bool, #[serde(default)] force_live: bool, #[serde(default)] wait: bool },
    Move { node: String, #[serde(default)] force_live: bool, #[serde(default)] wait: bool },
    Unmigrate { #[serde(default)] wait: bool },
}

/// `POST /vm/<vm>/node`: enqueues the requested relocation as a task
/// routed to the domain's *current* node, which holds the libvirt
/// connection and runs the Migration Controller. Returns
/// `202` with the task handle.
#[utoipa::path(
    post,
    path = "/v1/vm/{vm}/node",
    params(("vm" = String, Path, description = "VM uuid")),
    request_body = NodeActionRequest,
    responses(
        (status = 202, description = "Task accepted", body = super::TaskAccepted),
        (status = 400, description = "No open migration lineage", body = crate::rest::ApiError),
        (status = 404, description = "VM not found", body = crate::rest::ApiError)
    ),
    tag = "vms"
)]
pub async fn node_action(
    State(state): State<Arc<AppState>>,
    Path(vm): Path<String>,
    Json(req): Json<NodeActionRequest>,
) -> Response {
    match node_action_inner(&state, &vm, req).await {
        Ok(accepted) => {
            let location = format!("/api/v1/tasks/{}", accepted.task_id);
            (StatusCode::ACCEPTED, [(header::LOCATION, location)], Json(accepted)).into_response()
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

async fn node_action_inner(
    state: &AppState,
    vm: &str,
    req: NodeActionRequest,
) -> Result<TaskAccepted, pvc_core::PvcError> {
    let domain = state.registry.get_domain(vm).await?;

    let (name, mut kwargs) = match &req {
        NodeActionRequest::Migrate { node, force, force_live, .. } => {
            let mut kwargs = Map::new();
            kwargs.insert("target".into(), node.clone().into());
            kwargs.insert("force".into(), (*force).into());
            kwargs.insert("force_live".into(), (*force_live).into());
            ("vm.migrate".to_string(), kwargs)
        }
        NodeActionRequest::Move { node, force_live, .. } => {
            let mut kwargs = Map::new();
            kwargs.insert("target".into(), node.clone().into());
            kwargs.insert("force_live".into(), (*force_live).into());
            ("vm.move".to_string(), kwargs)
        }
        NodeActionRequest::Unmigrate { .. } => {
            if domain.last_node.is_none() {
                return Err(pvc_core::PvcError::Precondition(
                    "unmigrate requires an open migration lineage".to_string(),
                ));
            }
            ("vm.unmigrate".to_string(), Map::new())
        }
    };
    kwargs.insert("vm".into(), vm.into());

    let task_id = state.tasks.submit(name.clone(), kwargs, &domain.node).await?;
    Ok(TaskAccepted { task_id, task_name: name, run_on: domain.node })
}

/// `POST /vm/<vm>/locks`: enqueues `vm.flush_locks`, accepted only when
/// the VM is in `{stop, disable, mirror}`.
#[utoipa::path(
    post,
    path = "/v1/vm/{vm}/locks",
    params(("vm" = String, Path, description = "VM uuid")),
    responses(
        (status = 202, description = "Task accepted", body = super::TaskAccepted),
        (status = 400, description = "VM must be stopped to flush locks", body = crate::rest::ApiError),
        (status = 404, description = "VM not found", body = crate::rest::ApiError)
    ),
    tag = "vms"
)]
pub async fn flush_locks(State(state): State<Arc<AppState>>, Path(vm): Path<String>) -> Response {
    match flush_locks_inner(&state, &vm).await {
        Ok(accepted) => {
            let location = format!("/api/v1/tasks/{}", accepted.task_id);
            (StatusCode::ACCEPTED, [(header::LOCATION, location)], Json(accepted)).into_response()
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

async fn flush_locks_inner(state: &AppState, vm: &str) -> Result<TaskAccepted, pvc_core::PvcError> {
    let domain = state.registry.get_domain(vm).await?;
    let acceptable = matches!(
        domain.state,
        DomainRunState::Stop | DomainRunState::Disable | DomainRunState::Mirror
    );
    if !acceptable {
        return Err(pvc_core::PvcError::Precondition(
            "VM must be stopped to flush locks".to_string(),
        ));
    }

    let mut kwargs = Map::new();
    kwargs.insert("vm".into(), vm.into());
    let task_id = state.tasks.submit("vm.flush_locks", kwargs, &domain.node).await?;
    Ok(TaskAccepted { task_id, task_name: "vm.flush_locks".to_string(), run_on: domain.node })
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RenameVmRequest {
    pub new_name: String,
}

/// `POST /vm/<vm>/rename`: renames the VM and, per the open-question-(a)
/// rule preserved from the source (see `DESIGN.md`), only the subset of
/// its volumes whose name contains the old VM name — applied on the
/// owning node since the rename touches RBD volume names.
#[utoipa::path(
    post,
    path = "/v1/vm/{vm}/rename",
    params(("vm" = String, Path, description = "VM uuid")),
    request_body = RenameVmRequest,
    responses(
        (status = 202, description = "Task accepted", body = super::TaskAccepted),
        (status = 400, description = "Name already in use", body = crate::rest::ApiError),
        (status = 404, description = "VM not found", body = crate::rest::ApiError)
    ),
    tag = "vms"
)]
pub async fn rename(
    State(state): State<Arc<AppState>>,
    Path(vm): Path<String>,
    Json(req): Json<RenameVmRequest>,
) -> Response {
    match rename_inner(&state, &vm, req).await {
        Ok(accepted) => {
            let location = format!("/api/v1/tasks/{}", accepted.task_id);
            (StatusCode::ACCEPTED, [(header::LOCATION, location)], Json(accepted)).into_response()
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

async fn rename_inner(state: &AppState, vm: &str, req: RenameVmRequest) -> Result<TaskAccepted, pvc_core::PvcError> {
    let domain = state.registry.get_domain(vm).await?;
    let already_taken = state
        .registry
        .list_domains()
        .await?
        .iter()
        .any(|d| d.uuid != domain.uuid && d.name == req.new_name);
    if already_taken {
        return Err(pvc_core::PvcError::Precondition(format!(
            "VM name '{}' is already in use",
            req.new_name
        )));
    }

    let mut kwargs = Map::new();
    kwargs.insert("vm".into(), vm.into());
    kwargs.insert("new_name".into(), req.new_name.clone().into());
    let task_id = state.tasks.submit("vm.rename", kwargs, &domain.node).await?;
    Ok(TaskAccepted { task_id, task_name: "vm.rename".to_string(), run_on: domain.node })
}

#[derive(Debug, Serialize, ToSchema)]
pub struct NodePlacement {
    pub node: String,
    pub last_node: Option<String>,
}

/// Spec §9 open question (b): `vm_node` normalized to a single shape —
/// always an object, never a list (documented break from the source).
#[utoipa::path(
    get,
    path = "/v1/vm/{vm}/node",
    params(("vm" = String, Path, description = "VM uuid")),
    responses(
        (status = 200, description = "Current placement", body = NodePlacement),
        (status = 404, description = "VM not found", body = crate::rest::ApiError)
    ),
    tag = "vms"
)]
pub async fn get_node_placement(State(state): State<Arc<AppState>>, Path(vm): Path<String>) -> Response {
    match state.registry.get_domain(&vm).await {
        Ok(domain) => Json(NodePlacement { node: domain.node, last_node: domain.last_node }).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Ensure `state_machine`'s node-level `domain_state` table stays linked
/// against the REST surface that drives it (`POST
/// /node/<n>/domain-state`), so this module doesn't go stale if that
/// table's shape changes without anyone noticing here.
#[allow(dead_code)]
fn _links_against_state_machine(from: pvc_core::entity::node::DomainState, to: pvc_core::entity::node::DomainState) {
    let _ = state_machine::validate_domain_transition(from, to);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_from_stop_is_legal() {
        assert!(validate_domain_run_transition(DomainRunState::Stop, DomainRunState::Start).is_ok());
    }

    #[test]
    fn start_from_start_is_illegal() {
        assert!(validate_domain_run_transition(DomainRunState::Start, DomainRunState::Start).is_err());
    }
}
