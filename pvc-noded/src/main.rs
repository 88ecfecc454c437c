//! pvc-noded: the node-daemon binary. Owns this node's local physical
//! resources (libvirt domains, RBD locks, Ceph OSDs) and reconciles them
//! against shared desired state held in the coordination tree.
//! Every node in the cluster runs exactly one of these, regardless of
//! whether it also wins the coordinator election (that's
//! `pvc-coordinatord`'s job, a separate process).

mod domain_worker;
mod heartbeat;
mod libvirt;
mod primary;
mod rbd;
mod storage_executor;
mod view;
mod worker;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use pvc_core::entity::node::DaemonState;
use pvc_core::migration::MigrationController;
use pvc_core::state_machine::{validate_daemon_transition, DomainStateReconciler};
use pvc_core::tasks::TaskBus;
use pvc_core::ClusterConfig;
use pvc_coord::CoordClient;
use pvc_schema::Schema;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::domain_worker::NodeDomainWorker;
use crate::heartbeat::HeartbeatReporter;
use crate::libvirt::VirshDriver;
use crate::primary::ViewPrimaryResolver;
use crate::rbd::RbdCliLockManager;
use crate::storage_executor::CephStorageExecutor;
use crate::view::NodeView;
use crate::worker::TaskWorker;

/// pvc-noded: per-node reconciler and task worker.
#[derive(Parser, Debug)]
#[command(name = "pvc-noded", version, about)]
struct Args {
    /// This node's short hostname identity.
    #[arg(long)]
    node: Option<String>,

    /// Path to the cluster config TOML (shared with pvc-coordinatord).
    #[arg(long, default_value = "/etc/pvc/config.toml")]
    config: PathBuf,

    /// Libvirt connection URI on this node.
    #[arg(long, default_value = "qemu:///system")]
    libvirt_uri: String,

    /// RBD pool VM disks live in.
    #[arg(long, default_value = "vms")]
    rbd_pool: String,

    /// Filesystem mountpoint the disk-free health plugin watches.
    #[arg(long, default_value = "/")]
    watched_mountpoint: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "pvc_noded=info".into()))
        .init();

    let args = Args::parse();
    let node_name = args.node.unwrap_or_else(|| {
        hostname::get().map(|h| h.to_string_lossy().into_owned()).unwrap_or_else(|_| "unknown".to_string())
    });

    let config = load_config(&args.config).await;
    info!(node = %node_name, connect = %config.coordination_connect, "starting pvc-noded");

    let client = Arc::new(
        CoordClient::connect(
            &config.coordination_connect,
            std::time::Duration::from_secs(config.coordination_session_timeout_secs),
            &config.coordination_root,
        )
        .await?,
    );
    let schema = Arc::new(Schema::new(config.coordination_root.clone()));
    let view = Arc::new(NodeView::new(client.clone(), schema.clone()));

    register_node(&view, &node_name).await?;

    let migration = Arc::new(MigrationController::new(
        client.clone(),
        schema.clone(),
        Arc::new(VirshDriver::new(args.libvirt_uri.clone())),
        Arc::new(RbdCliLockManager::new(args.rbd_pool.clone())),
        config.migration_shutdown_timeout(),
    ));

    let tasks = Arc::new(TaskBus::new(client.clone(), schema.clone(), Arc::new(ViewPrimaryResolver::new(view.clone()))));
    let storage: Arc<dyn pvc_core::storage_executor::StorageExecutor> = Arc::new(CephStorageExecutor::new(node_name.clone()));

    let cancel = CancellationToken::new();

    let domain_worker = Arc::new(NodeDomainWorker::new(node_name.clone(), view.clone(), migration.clone(), config.default_selector));
    let reconciler = DomainStateReconciler::new(client.clone(), schema.clone(), node_name.clone(), domain_worker);
    let reconciler_cancel = cancel.clone();
    let reconciler_handle = tokio::spawn(async move { reconciler.run(reconciler_cancel).await });

    let heartbeat = HeartbeatReporter::new(node_name.clone(), view.clone(), args.watched_mountpoint.clone());
    let heartbeat_interval = std::time::Duration::from_secs(10);
    let heartbeat_cancel = cancel.clone();
    let heartbeat_handle = tokio::spawn(async move { heartbeat.run(heartbeat_interval, heartbeat_cancel).await });

    let task_worker = Arc::new(TaskWorker::new(
        node_name.clone(),
        tasks.clone(),
        view.clone(),
        migration.clone(),
        storage,
        args.rbd_pool.clone(),
    ));
    let worker_cancel = cancel.clone();
    let pool_size = config.task_worker_pool_size;
    let worker_handle = tokio::spawn(async move { task_worker.run_pool(pool_size, worker_cancel).await });

    shutdown_signal().await;
    info!(node = %node_name, "shutdown requested, draining within grace window");

    let grace = config.shutdown_grace();
    tokio::select! {
        _ = async {
            cancel.cancel();
            let _ = tokio::join!(reconciler_handle, heartbeat_handle, worker_handle);
        } => {}
        _ = tokio::time::sleep(grace) => {
            warn!(node = %node_name, "shutdown grace window elapsed before tasks drained");
        }
    }

    if let Err(e) = view.write_daemon_state(&node_name, DaemonState::Stop).await {
        warn!(node = %node_name, error = %e, "failed to write daemon_state=stop on shutdown");
    }
    info!(node = %node_name, "shutdown complete");
    Ok(())
}

/// Register this node on first start. A node already known from a prior run simply
/// transitions `init -> run`; a genuinely new node starts at `init` then
/// immediately advances to `run`, since there is no meaningful
/// "initializing" period once the process is up and has a coordination
/// session.
async fn register_node(view: &NodeView, node: &str) -> pvc_core::PvcResult<()> {
    let current = match view.get_node(node).await {
        Ok(n) => n.daemon_state,
        Err(pvc_core::PvcError::NotFound(_)) => {
            view.write_daemon_state(node, DaemonState::Init).await?;
            DaemonState::Init
        }
        Err(e) => return Err(e),
    };

    let target = match current {
        DaemonState::Init | DaemonState::Stop => DaemonState::Run,
        DaemonState::Fenced => DaemonState::Run,
        DaemonState::Run | DaemonState::Dead => {
            warn!(node, ?current, "node already marked run/dead on start, forcing run");
            DaemonState::Run
        }
    };
    if current != target {
        if let Err(e) = validate_daemon_transition(current, target) {
            warn!(node, ?current, ?target, error = %e, "daemon_state transition table refused registration, writing anyway");
        }
    }
    view.write_daemon_state(node, DaemonState::Run).await?;
    view.write_meta(node, env!("CARGO_PKG_VERSION"), &kernel_release(), std::env::consts::ARCH).await?;
    Ok(())
}

fn kernel_release() -> String {
    std::fs::read_to_string("/proc/sys/kernel/osrelease").map(|s| s.trim().to_string()).unwrap_or_default()
}

async fn load_config(path: &PathBuf) -> ClusterConfig {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => ClusterConfig::from_toml_str(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "failed to parse config, using defaults");
            ClusterConfig::default()
        }),
        Err(_) => {
            info!(path = %path.display(), "no config file found, using defaults");
            ClusterConfig::default()
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).expect("install SIGTERM handler");
    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
}
