//! pvc: thin CLI over the coordinator's REST surface. Every
//! subcommand is a single HTTP call; there is no local state beyond the
//! optional cached API key.

mod client;
mod rows;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pvc_core::entity::domain::{Domain, DomainRunState, MigrationMethod, Tag};
use pvc_core::entity::fault::Fault;
use pvc_core::entity::node::{CoordinatorState, DomainState, Node};
use pvc_core::entity::storage::{Osd, Pool, StorageSnapshot, Volume};
use pvc_core::entity::task::Task;
use pvc_core::placement::Selector;
use serde::Serialize;
use tabled::Table;

use client::{ApiClient, TaskAccepted};
use rows::{FaultRow, NodeRow, OsdRow, PoolRow, SnapshotRow, TaskRow, VmRow, VolumeRow};

#[derive(Parser)]
#[command(name = "pvc", about = "CLI for the pvc coordinator REST API", long_about = None)]
struct Cli {
    /// Coordinator base URL.
    #[arg(long, env = "PVC_SERVER", default_value = "http://127.0.0.1:8080")]
    server: String,

    /// API key. Falls back to a cached key from `pvc login` if unset.
    #[arg(long, env = "PVC_API_KEY")]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Exchange an API key for a session and cache it locally.
    Login {
        api_key: String,
    },
    /// VM (domain) operations.
    #[command(subcommand)]
    Vm(VmCommand),
    /// Hypervisor node operations.
    #[command(subcommand)]
    Node(NodeCommand),
    /// Ceph storage operations.
    #[command(subcommand)]
    Storage(StorageCommand),
    /// Asynchronous task status.
    #[command(subcommand)]
    Task(TaskCommand),
    /// Cluster fault lifecycle.
    #[command(subcommand)]
    Fault(FaultCommand),
}

#[derive(Subcommand)]
enum VmCommand {
    /// Define a new VM.
    Define {
        name: String,
        /// Node the VM is initially placed on.
        #[arg(long)]
        node: String,
        /// Path to a libvirt domain XML file.
        #[arg(long)]
        xml: PathBuf,
        #[arg(long)]
        uuid: Option<String>,
        #[arg(long, value_delimiter = ',')]
        node_limit: Vec<String>,
        #[arg(long, default_value = "none")]
        node_selector: SelectorArg,
        #[arg(long)]
        node_autostart: bool,
        #[arg(long, default_value = "live")]
        migration_method: MigrationMethodArg,
        #[arg(long, default_value_t = 0)]
        migration_max_downtime_ms: u64,
        #[arg(long, default_value = "")]
        profile: String,
    },
    /// List all VMs.
    List,
    /// Show a single VM.
    Get {
        vm: String,
    },
    /// Request a VM power-state transition.
    SetState {
        vm: String,
        state: DomainRunStateArg,
    },
    /// Live-migrate a running VM to another node, keeping a migration lineage.
    Migrate {
        vm: String,
        target: String,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        force_live: bool,
        #[arg(long)]
        wait: bool,
    },
    /// Permanently relocate a VM to another node (no lineage kept).
    Move {
        vm: String,
        target: String,
        #[arg(long)]
        force_live: bool,
        #[arg(long)]
        wait: bool,
    },
    /// Return a migrated VM to its `last_node`, closing the lineage.
    Unmigrate {
        vm: String,
        #[arg(long)]
        wait: bool,
    },
    /// Show a VM's current/last node placement.
    Node {
        vm: String,
    },
    /// Release this VM's stale RBD exclusive locks.
    FlushLocks {
        vm: String,
    },
}

#[derive(Subcommand)]
enum NodeCommand {
    /// List all nodes.
    List,
    /// Show a single node.
    Get {
        node: String,
    },
    /// Request the node evacuate its VMs (`domain_state.target = flush`).
    Flush {
        node: String,
    },
    /// Request the node accept placements again (`domain_state.target = ready`).
    Ready {
        node: String,
    },
    /// Request this node take over as primary coordinator.
    Takeover {
        node: String,
    },
}

#[derive(Subcommand)]
enum StorageCommand {
    /// OSD operations.
    #[command(subcommand)]
    Osd(OsdCommand),
    /// Pool operations.
    #[command(subcommand)]
    Pool(PoolCommand),
    /// Volume operations.
    #[command(subcommand)]
    Volume(VolumeCommand),
    /// Snapshot operations.
    #[command(subcommand)]
    Snapshot(SnapshotCommand),
}

#[derive(Subcommand)]
enum OsdCommand {
    List,
    Get { id: String },
    Add { node: String, data_device: String, #[arg(long)] db_device: Option<String>, #[arg(long)] split_count: Option<u32> },
    Remove { id: String, #[arg(long)] force: bool },
}

#[derive(Subcommand)]
enum PoolCommand {
    List,
    Get { name: String },
    Delete { name: String },
}

#[derive(Subcommand)]
enum VolumeCommand {
    List,
    Get { pool: String, name: String },
    Delete { pool: String, name: String },
}

#[derive(Subcommand)]
enum SnapshotCommand {
    List,
    Delete { pool: String, volume: String, name: String },
}

#[derive(Subcommand)]
enum TaskCommand {
    List,
    Get { id: String },
}

#[derive(Subcommand)]
enum FaultCommand {
    List {
        #[arg(long)]
        sort: Option<String>,
        #[arg(long)]
        descending: bool,
    },
    Get { id: String },
    Ack { id: String },
    Delete { id: String },
}

#[derive(Clone, clap::ValueEnum)]
enum DomainRunStateArg {
    Start,
    Stop,
    Shutdown,
    Restart,
    Disable,
}

impl From<DomainRunStateArg> for DomainRunState {
    fn from(a: DomainRunStateArg) -> Self {
        match a {
            DomainRunStateArg::Start => DomainRunState::Start,
            DomainRunStateArg::Stop => DomainRunState::Stop,
            DomainRunStateArg::Shutdown => DomainRunState::Shutdown,
            DomainRunStateArg::Restart => DomainRunState::Restart,
            DomainRunStateArg::Disable => DomainRunState::Disable,
        }
    }
}

#[derive(Clone, clap::ValueEnum)]
enum SelectorArg {
    Mem,
    MemProv,
    Vcpus,
    Load,
    Vms,
    None,
}

impl From<SelectorArg> for Selector {
    fn from(a: SelectorArg) -> Self {
        match a {
            SelectorArg::Mem => Selector::Mem,
            SelectorArg::MemProv => Selector::MemProv,
            SelectorArg::Vcpus => Selector::Vcpus,
            SelectorArg::Load => Selector::Load,
            SelectorArg::Vms => Selector::Vms,
            SelectorArg::None => Selector::None,
        }
    }
}

#[derive(Clone, clap::ValueEnum)]
enum MigrationMethodArg {
    Live,
    Shutdown,
    None,
}

impl From<MigrationMethodArg> for MigrationMethod {
    fn from(a: MigrationMethodArg) -> Self {
        match a {
            MigrationMethodArg::Live => MigrationMethod::Live,
            MigrationMethodArg::Shutdown => MigrationMethod::Shutdown,
            MigrationMethodArg::None => MigrationMethod::None,
        }
    }
}

#[derive(Serialize)]
struct DefineVmBody {
    uuid: Option<String>,
    name: String,
    xml: String,
    node: String,
    node_limit: Vec<String>,
    node_selector: Selector,
    node_autostart: bool,
    migration_method: MigrationMethod,
    migration_max_downtime_ms: u64,
    profile: String,
}

#[derive(Serialize)]
struct SetStateBody {
    state: DomainRunState,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case", tag = "action")]
enum NodeActionBody {
    Migrate { node: String, force: bool, force_live: bool, wait: bool },
    Move { node: String, force_live: bool, wait: bool },
    Unmigrate { wait: bool },
}

#[derive(Serialize)]
struct SetDomainStateBody {
    state: DomainState,
}

#[derive(Serialize)]
struct SetCoordinatorStateBody {
    state: CoordinatorState,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let api_key = cli.api_key.or_else(load_cached_key);
    let client = ApiClient::new(cli.server, api_key);

    match cli.command {
        Command::Login { api_key } => {
            #[derive(Serialize)]
            struct LoginBody {
                api_key: String,
            }
            #[derive(serde::Deserialize)]
            struct LoginResponse {
                ok: bool,
            }
            let resp: LoginResponse = client.post("/login", &LoginBody { api_key: api_key.clone() }).await?;
            if resp.ok {
                save_cached_key(&api_key)?;
                println!("logged in");
            } else {
                println!("login rejected");
            }
        }

        Command::Vm(cmd) => run_vm(&client, cmd).await?,
        Command::Node(cmd) => run_node(&client, cmd).await?,
        Command::Storage(cmd) => run_storage(&client, cmd).await?,
        Command::Task(cmd) => run_task(&client, cmd).await?,
        Command::Fault(cmd) => run_fault(&client, cmd).await?,
    }

    Ok(())
}

async fn run_vm(client: &ApiClient, cmd: VmCommand) -> anyhow::Result<()> {
    match cmd {
        VmCommand::Define {
            name,
            node,
            xml,
            uuid,
            node_limit,
            node_selector,
            node_autostart,
            migration_method,
            migration_max_downtime_ms,
            profile,
        } => {
            let xml = std::fs::read_to_string(&xml)?;
            let body = DefineVmBody {
                uuid,
                name,
                xml,
                node,
                node_limit,
                node_selector: node_selector.into(),
                node_autostart,
                migration_method: migration_method.into(),
                migration_max_downtime_ms,
                profile,
            };
            let domain: Domain = client.post("/vm", &body).await?;
            println!("{}", Table::new([VmRow::from(&domain)]));
        }
        VmCommand::List => {
            let domains: Vec<Domain> = client.get("/vm").await?;
            let rows: Vec<VmRow> = domains.iter().map(VmRow::from).collect();
            println!("{}", Table::new(rows));
        }
        VmCommand::Get { vm } => {
            let domain: Domain = client.get(&format!("/vm/{vm}")).await?;
            print_tags(&domain.tags);
            println!("{}", Table::new([VmRow::from(&domain)]));
        }
        VmCommand::SetState { vm, state } => {
            let domain: Domain = client.post(&format!("/vm/{vm}/state"), &SetStateBody { state: state.into() }).await?;
            println!("{}", Table::new([VmRow::from(&domain)]));
        }
        VmCommand::Migrate { vm, target, force, force_live, wait } => {
            let body = NodeActionBody::Migrate { node: target, force, force_live, wait };
            let accepted: TaskAccepted = client.post(&format!("/vm/{vm}/node"), &body).await?;
            println!("{}", Table::new([accepted]));
        }
        VmCommand::Move { vm, target, force_live, wait } => {
            let body = NodeActionBody::Move { node: target, force_live, wait };
            let accepted: TaskAccepted = client.post(&format!("/vm/{vm}/node"), &body).await?;
            println!("{}", Table::new([accepted]));
        }
        VmCommand::Unmigrate { vm, wait } => {
            let body = NodeActionBody::Unmigrate { wait };
            let accepted: TaskAccepted = client.post(&format!("/vm/{vm}/node"), &body).await?;
            println!("{}", Table::new([accepted]));
        }
        VmCommand::Node { vm } => {
            #[derive(serde::Deserialize)]
            struct PlacementResponse {
                node: String,
                last_node: Option<String>,
            }
            #[derive(tabled::Tabled)]
            struct PlacementRow {
                node: String,
                last_node: String,
            }
            let placement: PlacementResponse = client.get(&format!("/vm/{vm}/node")).await?;
            let row = PlacementRow { node: placement.node, last_node: placement.last_node.unwrap_or_default() };
            println!("{}", Table::new([row]));
        }
        VmCommand::FlushLocks { vm } => {
            let accepted: TaskAccepted = client.post_empty(&format!("/vm/{vm}/locks")).await?;
            println!("{}", Table::new([accepted]));
        }
    }
    Ok(())
}

fn print_tags(tags: &[Tag]) {
    if tags.is_empty() {
        return;
    }
    let names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
    println!("tags: {}", names.join(", "));
}

async fn run_node(client: &ApiClient, cmd: NodeCommand) -> anyhow::Result<()> {
    match cmd {
        NodeCommand::List => {
            let nodes: Vec<Node> = client.get("/node").await?;
            let rows: Vec<NodeRow> = nodes.iter().map(NodeRow::from).collect();
            println!("{}", Table::new(rows));
        }
        NodeCommand::Get { node } => {
            let node: Node = client.get(&format!("/node/{node}")).await?;
            println!("{}", Table::new([NodeRow::from(&node)]));
        }
        NodeCommand::Flush { node } => {
            client
                .post_status(&format!("/node/{node}/domain-state"), &SetDomainStateBody { state: DomainState::Flush })
                .await?;
            println!("flush requested for {node}");
        }
        NodeCommand::Ready { node } => {
            client
                .post_status(&format!("/node/{node}/domain-state"), &SetDomainStateBody { state: DomainState::Ready })
                .await?;
            println!("ready requested for {node}");
        }
        NodeCommand::Takeover { node } => {
            client
                .post_status(
                    &format!("/node/{node}/coordinator-state"),
                    &SetCoordinatorStateBody { state: CoordinatorState::Primary },
                )
                .await?;
            println!("takeover requested for {node}");
        }
    }
    Ok(())
}

async fn run_storage(client: &ApiClient, cmd: StorageCommand) -> anyhow::Result<()> {
    match cmd {
        StorageCommand::Osd(cmd) => run_osd(client, cmd).await?,
        StorageCommand::Pool(cmd) => run_pool(client, cmd).await?,
        StorageCommand::Volume(cmd) => run_volume(client, cmd).await?,
        StorageCommand::Snapshot(cmd) => run_snapshot(client, cmd).await?,
    }
    Ok(())
}

async fn run_osd(client: &ApiClient, cmd: OsdCommand) -> anyhow::Result<()> {
    match cmd {
        OsdCommand::List => {
            let osds: Vec<Osd> = client.get("/storage/ceph/osd").await?;
            let rows: Vec<OsdRow> = osds.iter().map(OsdRow::from).collect();
            println!("{}", Table::new(rows));
        }
        OsdCommand::Get { id } => {
            let osd: Osd = client.get(&format!("/storage/ceph/osd/{id}")).await?;
            println!("{}", Table::new([OsdRow::from(&osd)]));
        }
        OsdCommand::Add { node, data_device, db_device, split_count } => {
            #[derive(Serialize)]
            struct AddOsdBody {
                node: String,
                data_device: String,
                db_device: Option<String>,
                split_count: Option<u32>,
            }
            let accepted: TaskAccepted =
                client.post("/storage/ceph/osd", &AddOsdBody { node, data_device, db_device, split_count }).await?;
            println!("{}", Table::new([accepted]));
        }
        OsdCommand::Remove { id, force } => {
            let query = if force { vec![("force", "true".to_string())] } else { vec![] };
            let accepted: TaskAccepted = client.delete_with_response(&format!("/storage/ceph/osd/{id}"), &query).await?;
            println!("{}", Table::new([accepted]));
        }
    }
    Ok(())
}

async fn run_pool(client: &ApiClient, cmd: PoolCommand) -> anyhow::Result<()> {
    match cmd {
        PoolCommand::List => {
            let pools: Vec<Pool> = client.get("/storage/ceph/pool").await?;
            let rows: Vec<PoolRow> = pools.iter().map(PoolRow::from).collect();
            println!("{}", Table::new(rows));
        }
        PoolCommand::Get { name } => {
            let pool: Pool = client.get(&format!("/storage/ceph/pool/{name}")).await?;
            println!("{}", Table::new([PoolRow::from(&pool)]));
        }
        PoolCommand::Delete { name } => {
            client.delete(&format!("/storage/ceph/pool/{name}")).await?;
            println!("deleted pool {name}");
        }
    }
    Ok(())
}

async fn run_volume(client: &ApiClient, cmd: VolumeCommand) -> anyhow::Result<()> {
    match cmd {
        VolumeCommand::List => {
            let volumes: Vec<Volume> = client.get("/storage/ceph/volume").await?;
            let rows: Vec<VolumeRow> = volumes.iter().map(VolumeRow::from).collect();
            println!("{}", Table::new(rows));
        }
        VolumeCommand::Get { pool, name } => {
            let volume: Volume = client.get(&format!("/storage/ceph/volume/{pool}/{name}")).await?;
            println!("{}", Table::new([VolumeRow::from(&volume)]));
        }
        VolumeCommand::Delete { pool, name } => {
            client.delete(&format!("/storage/ceph/volume/{pool}/{name}")).await?;
            println!("deleted volume {pool}/{name}");
        }
    }
    Ok(())
}

async fn run_snapshot(client: &ApiClient, cmd: SnapshotCommand) -> anyhow::Result<()> {
    match cmd {
        SnapshotCommand::List => {
            let snapshots: Vec<StorageSnapshot> = client.get("/storage/ceph/snapshot").await?;
            let rows: Vec<SnapshotRow> = snapshots.iter().map(SnapshotRow::from).collect();
            println!("{}", Table::new(rows));
        }
        SnapshotCommand::Delete { pool, volume, name } => {
            client.delete(&format!("/storage/ceph/snapshot/{pool}/{volume}/{name}")).await?;
            println!("deleted snapshot {pool}/{volume}/{name}");
        }
    }
    Ok(())
}

async fn run_task(client: &ApiClient, cmd: TaskCommand) -> anyhow::Result<()> {
    match cmd {
        TaskCommand::List => {
            let tasks: Vec<Task> = client.get("/tasks").await?;
            let rows: Vec<TaskRow> = tasks.iter().map(TaskRow::from).collect();
            println!("{}", Table::new(rows));
        }
        TaskCommand::Get { id } => {
            let task: Task = client.get(&format!("/tasks/{id}")).await?;
            println!("{}", Table::new([TaskRow::from(&task)]));
        }
    }
    Ok(())
}

async fn run_fault(client: &ApiClient, cmd: FaultCommand) -> anyhow::Result<()> {
    match cmd {
        FaultCommand::List { sort, descending } => {
            let mut query = Vec::new();
            if let Some(sort) = sort {
                query.push(("sort", sort));
            }
            if descending {
                query.push(("descending", "true".to_string()));
            }
            let faults: Vec<Fault> = client.get_query("/faults", &query).await?;
            let rows: Vec<FaultRow> = faults.iter().map(FaultRow::from).collect();
            println!("{}", Table::new(rows));
        }
        FaultCommand::Get { id } => {
            let fault: Fault = client.get(&format!("/faults/{id}")).await?;
            println!("{}", Table::new([FaultRow::from(&fault)]));
        }
        FaultCommand::Ack { id } => {
            let fault: Fault = client.put_empty(&format!("/faults/{id}/ack")).await?;
            println!("{}", Table::new([FaultRow::from(&fault)]));
        }
        FaultCommand::Delete { id } => {
            client.delete(&format!("/faults/{id}")).await?;
            println!("deleted fault {id}");
        }
    }
    Ok(())
}

fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("pvc"))
}

fn load_cached_key() -> Option<String> {
    let path = config_dir()?.join("api_key");
    std::fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn save_cached_key(key: &str) -> anyhow::Result<()> {
    let dir = config_dir().ok_or_else(|| anyhow::anyhow!("no config directory available"))?;
    std::fs::create_dir_all(&dir)?;
    std::fs::write(dir.join("api_key"), key)?;
    Ok(())
}
