//! pvc-coordinatord: the primary-role binary. Every node in the cluster
//! may run one of these; whichever wins the ZK election actually brings
//! up the floating services, runs the fencing monitor, and aggregates
//! node health into cluster faults. All of
//! them serve the REST API regardless of election state, since reads and
//! most writes don't require being primary.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use pvc_coord::CoordClient;
use pvc_core::entity::node::HealthEntry;
use pvc_core::fencing::FencingMonitor;
use pvc_core::floating::FloatingServicesManager;
use pvc_core::health::{apply_reading, reap_stale, HealthReading};
use pvc_core::{ClusterConfig, PvcResult};
use pvc_schema::{PathKind, Schema, VersionAction, SCHEMA_VERSION_LOCAL};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pvc_coordinatord::auth;
use pvc_coordinatord::election_driver::ElectionDriver;
use pvc_coordinatord::floating_impl::{
    LoggingDnsAggregator, LoggingMetadataResponder, ProcessTrackingDhcp, ShellFloatingIpManager,
    ShellGatewayManager,
};
use pvc_coordinatord::ipmi::{BmcConfig, IpmiToolFencer};
use pvc_coordinatord::registry::ClusterRegistry;
use pvc_coordinatord::rest::{routes::create_router, AppState};

/// pvc-coordinatord: primary election, fencing, floating services, REST API.
#[derive(Parser, Debug)]
#[command(name = "pvc-coordinatord", version, about)]
struct Args {
    /// This process's node identity, used for election and coordinator_state.
    #[arg(long)]
    node: Option<String>,

    /// Path to the cluster config TOML.
    #[arg(long, default_value = "/etc/pvc/config.toml")]
    config: PathBuf,

    /// REST API listen address.
    #[arg(long, default_value = "[::]:7370")]
    listen: String,

    /// Comma-separated API keys accepted by `X-Api-Key`/session login.
    /// Empty disables auth, matching the teacher's `--dev` escape hatch.
    #[arg(long, value_delimiter = ',')]
    api_key: Vec<String>,

    /// Path to a BMC credentials TOML (`node.bmc_host/bmc_user/bmc_pass`
    /// tables), required for real fencing.
    #[arg(long)]
    bmc_config: Option<PathBuf>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct BmcFile {
    #[serde(default)]
    node: HashMap<String, BmcConfig>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "pvc_coordinatord=info".into()))
        .init();

    let args = Args::parse();
    let node_name = args.node.unwrap_or_else(|| {
        hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string())
    });

    let config = load_config(&args.config).await;
    let bmcs = load_bmc_config(args.bmc_config.as_deref()).await;

    info!(node = %node_name, connect = %config.coordination_connect, "starting pvc-coordinatord");

    let client = Arc::new(
        CoordClient::connect(
            &config.coordination_connect,
            std::time::Duration::from_secs(config.coordination_session_timeout_secs),
            &config.coordination_root,
        )
        .await?,
    );
    let schema = Arc::new(Schema::new(config.coordination_root.clone()));

    ensure_schema_version(&client, &schema).await?;

    let registry = Arc::new(ClusterRegistry::new(client.clone(), schema.clone()));
    let tasks = Arc::new(pvc_core::tasks::TaskBus::new(client.clone(), schema.clone(), registry.clone()));
    let audit = Arc::new(pvc_log::AuditLogger::new("pvc-coordinatord"));

    let floating = Arc::new(FloatingServicesManager::new(
        Arc::new(ShellFloatingIpManager::new(
            config.floating_interface.clone(),
            config.floating_upstream_cidr.clone(),
            config.floating_cluster_cidr.clone(),
            config.floating_storage_cidr.clone(),
        )),
        Arc::new(LoggingDnsAggregator),
        Arc::new(ProcessTrackingDhcp::default()),
        Arc::new(LoggingMetadataResponder),
        Arc::new(ShellGatewayManager::new(config.bridge_prefix.clone())),
        registry.clone(),
    ));

    let fencing = Arc::new(FencingMonitor::new(
        client.clone(),
        schema.clone(),
        registry.clone(),
        Arc::new(IpmiToolFencer::new(bmcs)),
        config.fence_threshold(),
        config.fence_retries,
        config.fence_power_on_after,
        config.default_selector,
    ));

    let cancel = CancellationToken::new();

    let election_driver = ElectionDriver::new(
        client.clone(),
        schema.clone(),
        registry.clone(),
        node_name.clone(),
        floating.clone(),
        fencing.clone(),
        config.fence_monitor_interval(),
    );
    let election_cancel = cancel.clone();
    let election_handle = tokio::spawn(async move { election_driver.run(election_cancel).await });

    let health_cancel = cancel.clone();
    let health_registry = registry.clone();
    let health_handle = tokio::spawn(async move {
        run_fault_aggregator(health_registry, health_cancel).await;
    });

    let app_state = Arc::new(AppState {
        registry,
        tasks,
        api_keys: auth::parse_keys(&args.api_key),
        audit,
    });
    let router = create_router(app_state);

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!(listen = %args.listen, "REST API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    let _ = election_handle.await;
    let _ = health_handle.await;
    info!("shutdown complete");
    Ok(())
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

async fn load_bmc_config(path: Option<&std::path::Path>) -> HashMap<String, BmcConfig> {
    let Some(path) = path else { return HashMap::new() };
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => toml::from_str::<BmcFile>(&raw).map(|f| f.node).unwrap_or_default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read BMC config");
            HashMap::new()
        }
    }
}

/// Reconcile the stored schema version against this binary's
/// [`SCHEMA_VERSION_LOCAL`], replaying any pending upgrade steps before
/// anything else touches coordination state.
async fn ensure_schema_version(client: &Arc<CoordClient>, schema: &Schema) -> PvcResult<()> {
    let version_key = schema.path(&PathKind::SchemaVersion);
    let stored: u32 = match client.read(&version_key).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or(0),
        Err(pvc_coord::CoordError::NoNode(_)) => 0,
        Err(e) => return Err(e.into()),
    };

    if stored == 0 {
        client.create_parents(&version_key).await?;
        client
            .write(vec![(version_key, serde_json::to_vec(&SCHEMA_VERSION_LOCAL)?)])
            .await?;
        return Ok(());
    }

    match schema.check_version(SCHEMA_VERSION_LOCAL, stored) {
        Ok(VersionAction::UpToDate) => Ok(()),
        Ok(VersionAction::NeedsUpgrade { from, to }) => {
            info!(from, to, "replaying schema upgrade steps");
            for step in schema.upgrade_steps() {
                if step.from_version < from {
                    continue;
                }
                info!(step = step.description, "applying schema upgrade step");
                for (old, new) in step.renames {
                    if old == new {
                        continue;
                    }
                    if let Ok(bytes) = client.read(&old).await {
                        client.write(vec![(new, bytes)]).await?;
                        client.delete(&old, true).await?;
                    }
                }
            }
            client
                .write(vec![(version_key, serde_json::to_vec(&to)?)])
                .await?;
            Ok(())
        }
        Err(e) => {
            panic!("refusing to start against a newer schema version: {e}");
        }
    }
}

/// Runs only meaningfully on the primary (writes are cheap idempotent
/// upserts from any instance, but only the primary's fencing/takeover
/// sequencing depends on faults being current), so every instance just
/// runs this unconditionally against the node health table.
async fn run_fault_aggregator(registry: Arc<ClusterRegistry>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(15));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                if let Err(e) = aggregate_once(&registry).await {
                    warn!(error = %e, "fault aggregation pass failed");
                }
            }
        }
    }
}

async fn aggregate_once(registry: &ClusterRegistry) -> PvcResult<()> {
    let nodes = registry.list_nodes().await?;
    let mut detected_ids = Vec::new();
    let existing = registry.list_faults().await?;

    for node in &nodes {
        for (plugin, entry) in &node.health {
            let reading = HealthReading { delta: entry.health_delta, message: entry.message.clone() };
            let subject = format!("{}:{plugin}", node.name);
            let id = pvc_core::entity::fault::fault_id(plugin, &subject, "{message}");
            let prior = existing.iter().find(|f| f.id == id).cloned();
            if let Some(fault) = apply_reading(prior, plugin, &subject, "{message}", &reading) {
                detected_ids.push(fault.id.clone());
                registry.upsert_fault(fault).await?;
            }
        }
    }

    let stale = reap_stale(existing, &detected_ids);
    for fault in stale {
        registry.delete_fault(&fault.id).await?;
    }
    Ok(())
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

#[allow(dead_code)]
fn _links_health_entry(_: HealthEntry) {}
