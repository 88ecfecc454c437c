use std::sync::Arc;

use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use super::handlers::{faults, metrics, nodes, storage, tasks, vms};
use super::AppState;
use crate::auth;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "pvc coordinator API",
        version = "0.1.0",
        description = "Coordination-tree REST surface for the cluster's VM, node, storage, task and fault state.",
        license(name = "MIT")
    ),
    tags(
        (name = "auth", description = "Session login"),
        (name = "vms", description = "VM (domain) definition, power state and placement"),
        (name = "nodes", description = "Hypervisor node status and coordinator/domain state requests"),
        (name = "storage", description = "Ceph OSD/pool/volume/snapshot coordination state"),
        (name = "tasks", description = "Asynchronous task status"),
        (name = "faults", description = "Cluster fault lifecycle")
    ),
    paths(
        auth::login,
        vms::define,
        vms::get,
        vms::list,
        vms::set_state,
        vms::node_action,
        vms::flush_locks,
        vms::rename,
        vms::get_node_placement,
        nodes::list,
        nodes::get,
        nodes::set_domain_state,
        nodes::set_coordinator_state,
        storage::add_osd,
        storage::remove_osd,
        storage::list_osds,
        storage::get_osd,
        storage::list_pools,
        storage::put_pool,
        storage::get_pool,
        storage::delete_pool,
        storage::list_volumes,
        storage::put_volume,
        storage::get_volume,
        storage::delete_volume,
        storage::list_snapshots,
        storage::put_snapshot,
        storage::delete_snapshot,
        tasks::list,
        tasks::get,
        faults::list,
        faults::get,
        faults::ack,
        faults::delete,
    ),
    components(schemas(
        auth::LoginRequest,
        auth::LoginResponse,
        super::ApiError,
        super::handlers::TaskAccepted,
        vms::DefineVmRequest,
        vms::SetStateRequest,
        vms::NodeActionRequest,
        vms::RenameVmRequest,
        vms::NodePlacement,
        pvc_core::entity::domain::Domain,
        pvc_core::entity::domain::DomainRunState,
        pvc_core::entity::domain::DomainSnapshot,
        pvc_core::entity::domain::MigrationMethod,
        pvc_core::entity::domain::Tag,
        pvc_core::placement::Selector,
        nodes::SetDomainStateRequest,
        nodes::SetCoordinatorStateRequest,
        pvc_core::entity::node::Node,
        pvc_core::entity::node::DaemonState,
        pvc_core::entity::node::CoordinatorState,
        pvc_core::entity::node::DomainState,
        pvc_core::entity::node::HealthEntry,
        pvc_core::entity::node::NodeResources,
        storage::AddOsdRequest,
        storage::RemoveOsdQuery,
        pvc_core::entity::storage::Osd,
        pvc_core::entity::storage::OsdStats,
        pvc_core::entity::storage::Pool,
        pvc_core::entity::storage::PoolStats,
        pvc_core::entity::storage::Volume,
        pvc_core::entity::storage::VolumeStats,
        pvc_core::entity::storage::StorageSnapshot,
        pvc_core::entity::task::Task,
        pvc_core::entity::task::TaskState,
        pvc_core::entity::task::TaskProgress,
        pvc_core::entity::fault::Fault,
        pvc_core::entity::fault::FaultStatus,
        pvc_core::health::FaultSortKey,
    ))
)]
pub struct ApiDoc;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/login", post(auth::login))
        // VMs
        .route("/vm", get(vms::list).post(vms::define))
        .route("/vm/{vm}", get(vms::get))
        .route("/vm/{vm}/state", post(vms::set_state))
        .route("/vm/{vm}/node", get(vms::get_node_placement).post(vms::node_action))
        .route("/vm/{vm}/locks", post(vms::flush_locks))
        .route("/vm/{vm}/rename", post(vms::rename))
        // Nodes
        .route("/node", get(nodes::list))
        .route("/node/{n}", get(nodes::get))
        .route("/node/{n}/domain-state", post(nodes::set_domain_state))
        .route("/node/{n}/coordinator-state", post(nodes::set_coordinator_state))
        // Storage
        .route("/storage/ceph/osd", get(storage::list_osds).post(storage::add_osd))
        .route("/storage/ceph/osd/{id}", get(storage::get_osd).delete(storage::remove_osd))
        .route("/storage/ceph/pool", get(storage::list_pools).post(storage::put_pool))
        .route("/storage/ceph/pool/{name}", get(storage::get_pool).delete(storage::delete_pool))
        .route("/storage/ceph/volume", get(storage::list_volumes).post(storage::put_volume))
        .route(
            "/storage/ceph/volume/{pool}/{name}",
            get(storage::get_volume).delete(storage::delete_volume),
        )
        .route("/storage/ceph/snapshot", get(storage::list_snapshots).post(storage::put_snapshot))
        .route(
            "/storage/ceph/snapshot/{pool}/{volume}/{name}",
            delete(storage::delete_snapshot),
        )
        // Tasks
        .route("/tasks", get(tasks::list))
        .route("/tasks/{id}", get(tasks::get))
        // Faults
        .route("/faults", get(faults::list))
        .route("/faults/{id}", get(faults::get).delete(faults::delete))
        .route("/faults/{id}/ack", put(faults::ack))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), auth::require_api_key));

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api/v1", api_routes)
        // Unauthenticated and outside /api/v1, per spec: Prometheus scrapers
        // don't carry an X-Api-Key.
        .route("/metrics", get(metrics::render))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
