//! `tabled::Tabled` row shapes for list output. Each mirrors the subset
//! of fields the teacher's TUI table views show for the same resource
//! (`mvirt-cli::tui::views::{vms,network,storage,system}`), trimmed to
//! what fits a terminal-width table instead of a TUI pane.

use pvc_core::entity::domain::{Domain, DomainRunState};
use pvc_core::entity::fault::{Fault, FaultStatus};
use pvc_core::entity::node::{CoordinatorState, DaemonState, DomainState, Node};
use pvc_core::entity::storage::{Osd, Pool, StorageSnapshot, Volume};
use pvc_core::entity::task::{Task, TaskState};
use tabled::Tabled;

#[derive(Tabled)]
pub struct VmRow {
    #[tabled(rename = "UUID")]
    pub uuid: String,
    #[tabled(rename = "NAME")]
    pub name: String,
    #[tabled(rename = "STATE")]
    pub state: String,
    #[tabled(rename = "NODE")]
    pub node: String,
    #[tabled(rename = "LAST NODE")]
    pub last_node: String,
}

impl From<&Domain> for VmRow {
    fn from(d: &Domain) -> Self {
        Self {
            uuid: d.uuid.clone(),
            name: d.name.clone(),
            state: run_state_label(d.state).to_string(),
            node: d.node.clone(),
            last_node: d.last_node.clone().unwrap_or_default(),
        }
    }
}

fn run_state_label(state: DomainRunState) -> &'static str {
    match state {
        DomainRunState::Start => "start",
        DomainRunState::Stop => "stop",
        DomainRunState::Shutdown => "shutdown",
        DomainRunState::Restart => "restart",
        DomainRunState::Disable => "disable",
        DomainRunState::Migrate => "migrate",
        DomainRunState::Unmigrate => "unmigrate",
        DomainRunState::Provision => "provision",
        DomainRunState::Import => "import",
        DomainRunState::Restore => "restore",
        DomainRunState::Mirror => "mirror",
        DomainRunState::Fail => "fail",
    }
}

#[derive(Tabled)]
pub struct NodeRow {
    #[tabled(rename = "NAME")]
    pub name: String,
    #[tabled(rename = "DAEMON")]
    pub daemon_state: String,
    #[tabled(rename = "COORDINATOR")]
    pub coordinator_state: String,
    #[tabled(rename = "DOMAIN (tgt/obs)")]
    pub domain_state: String,
    #[tabled(rename = "HEALTH")]
    pub health: String,
    #[tabled(rename = "VMS")]
    pub vms: usize,
}

impl From<&Node> for NodeRow {
    fn from(n: &Node) -> Self {
        Self {
            name: n.name.clone(),
            daemon_state: daemon_state_label(n.daemon_state).to_string(),
            coordinator_state: coordinator_state_label(n.coordinator_state).to_string(),
            domain_state: format!(
                "{}/{}",
                domain_state_label(n.domain_state_target),
                domain_state_label(n.domain_state_observed)
            ),
            health: n.overall_health.to_string(),
            vms: n.running_domains.len(),
        }
    }
}

fn daemon_state_label(s: DaemonState) -> &'static str {
    match s {
        DaemonState::Init => "init",
        DaemonState::Run => "run",
        DaemonState::Stop => "stop",
        DaemonState::Dead => "dead",
        DaemonState::Fenced => "fenced",
    }
}

fn coordinator_state_label(s: CoordinatorState) -> &'static str {
    match s {
        CoordinatorState::Primary => "primary",
        CoordinatorState::Secondary => "secondary",
        CoordinatorState::Takeover => "takeover",
        CoordinatorState::Relinquish => "relinquish",
        CoordinatorState::None => "-",
    }
}

fn domain_state_label(s: DomainState) -> &'static str {
    match s {
        DomainState::Ready => "ready",
        DomainState::Flush => "flush",
        DomainState::Flushed => "flushed",
        DomainState::Unflush => "unflush",
    }
}

#[derive(Tabled)]
pub struct OsdRow {
    #[tabled(rename = "ID")]
    pub id: u32,
    #[tabled(rename = "NODE")]
    pub node: String,
    #[tabled(rename = "DEVICE")]
    pub data_device: String,
    #[tabled(rename = "UP")]
    pub up: bool,
    #[tabled(rename = "IN")]
    pub in_cluster: bool,
    #[tabled(rename = "USED%")]
    pub utilization: f64,
}

impl From<&Osd> for OsdRow {
    fn from(o: &Osd) -> Self {
        Self {
            id: o.id,
            node: o.node.clone(),
            data_device: o.data_device.clone(),
            up: o.stats.up,
            in_cluster: o.stats.in_cluster,
            utilization: o.stats.utilization,
        }
    }
}

#[derive(Tabled)]
pub struct PoolRow {
    #[tabled(rename = "NAME")]
    pub name: String,
    #[tabled(rename = "PGS")]
    pub pgs: u32,
    #[tabled(rename = "TIER")]
    pub tier: String,
    #[tabled(rename = "REPLICATION")]
    pub replication: String,
    #[tabled(rename = "USED")]
    pub used_bytes: u64,
}

impl From<&Pool> for PoolRow {
    fn from(p: &Pool) -> Self {
        Self {
            name: p.name.clone(),
            pgs: p.pgs,
            tier: p.tier.clone(),
            replication: p.replication.clone(),
            used_bytes: p.stats.used_bytes,
        }
    }
}

#[derive(Tabled)]
pub struct VolumeRow {
    #[tabled(rename = "POOL")]
    pub pool: String,
    #[tabled(rename = "NAME")]
    pub name: String,
    #[tabled(rename = "SIZE")]
    pub size_bytes: u64,
    #[tabled(rename = "FORMAT")]
    pub format: String,
}

impl From<&Volume> for VolumeRow {
    fn from(v: &Volume) -> Self {
        Self { pool: v.pool.clone(), name: v.name.clone(), size_bytes: v.size_bytes, format: v.stats.format.clone() }
    }
}

#[derive(Tabled)]
pub struct SnapshotRow {
    #[tabled(rename = "POOL")]
    pub pool: String,
    #[tabled(rename = "VOLUME")]
    pub volume: String,
    #[tabled(rename = "NAME")]
    pub name: String,
    #[tabled(rename = "TIMESTAMP")]
    pub timestamp: String,
}

impl From<&StorageSnapshot> for SnapshotRow {
    fn from(s: &StorageSnapshot) -> Self {
        Self {
            pool: s.pool.clone(),
            volume: s.volume.clone(),
            name: s.name.clone(),
            timestamp: s.timestamp.to_rfc3339(),
        }
    }
}

#[derive(Tabled)]
pub struct TaskRow {
    #[tabled(rename = "ID")]
    pub id: String,
    #[tabled(rename = "NAME")]
    pub name: String,
    #[tabled(rename = "NODE")]
    pub routing_key: String,
    #[tabled(rename = "STATE")]
    pub state: String,
    #[tabled(rename = "PROGRESS")]
    pub progress: String,
}

impl From<&Task> for TaskRow {
    fn from(t: &Task) -> Self {
        Self {
            id: t.id.clone(),
            name: t.name.clone(),
            routing_key: t.routing_key.clone(),
            state: task_state_label(t.state).to_string(),
            progress: format!("{}/{} {}", t.progress.current, t.progress.total, t.progress.status),
        }
    }
}

fn task_state_label(s: TaskState) -> &'static str {
    match s {
        TaskState::Pending => "pending",
        TaskState::Started => "started",
        TaskState::Success => "success",
        TaskState::Failure => "failure",
    }
}

#[derive(Tabled)]
pub struct FaultRow {
    #[tabled(rename = "ID")]
    pub id: String,
    #[tabled(rename = "STATUS")]
    pub status: String,
    #[tabled(rename = "DELTA")]
    pub health_delta: u8,
    #[tabled(rename = "LAST REPORTED")]
    pub last_reported: String,
    #[tabled(rename = "MESSAGE")]
    pub message: String,
}

impl From<&Fault> for FaultRow {
    fn from(f: &Fault) -> Self {
        Self {
            id: f.id.clone(),
            status: match f.status {
                FaultStatus::New => "new".to_string(),
                FaultStatus::Ack => "ack".to_string(),
            },
            health_delta: f.health_delta,
            last_reported: f.last_reported.to_rfc3339(),
            message: f.message.clone(),
        }
    }
}
