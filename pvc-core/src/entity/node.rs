//! Node entity.

use std::collections::BTreeMap;
use utoipa::ToSchema;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DaemonState {
    Init,
    Run,
    Stop,
    Dead,
    Fenced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    Primary,
    Secondary,
    Takeover,
    Relinquish,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DomainState {
    Ready,
    Flush,
    Flushed,
    Unflush,
}

/// One plugin's last health reading for a node.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthEntry {
    pub name: String,
    pub last_run: DateTime<Utc>,
    pub health_delta: u8,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct NodeResources {
    pub load_5m: f64,
    pub vcpu_total: u32,
    pub vcpu_allocated: u32,
    pub memory_total_mb: u64,
    pub memory_used_mb: u64,
    pub memory_free_mb: u64,
    pub memory_allocated_mb: u64,
    pub memory_provisioned_mb: u64,
}

/// A hypervisor node, identified by its short hostname. Owns its own
/// subtree in the coordination store; only the node itself writes
/// `resources`/`health`/`heartbeat`, while `coordinator_state` may be
/// written by the election driver and `domain_state.target` by any
/// caller requesting flush/ready.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Node {
    pub name: String,
    pub daemon_state: DaemonState,
    pub coordinator_state: CoordinatorState,
    /// Requested half of the domain state machine.
    pub domain_state_target: DomainState,
    /// What the node itself has actually converged to.
    pub domain_state_observed: DomainState,
    pub heartbeat: DateTime<Utc>,
    pub pvc_version: String,
    pub kernel: String,
    pub arch: String,
    pub resources: NodeResources,
    pub running_domains: Vec<String>,
    pub health: BTreeMap<String, HealthEntry>,
    pub overall_health: u8,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            daemon_state: DaemonState::Init,
            coordinator_state: CoordinatorState::None,
            domain_state_target: DomainState::Ready,
            domain_state_observed: DomainState::Ready,
            heartbeat: Utc::now(),
            pvc_version: String::new(),
            kernel: String::new(),
            arch: String::new(),
            resources: NodeResources::default(),
            running_domains: Vec::new(),
            health: BTreeMap::new(),
            overall_health: 100,
        }
    }

    /// Is this node an eligible placement candidate?
    pub fn is_placement_candidate(&self) -> bool {
        self.daemon_state == DaemonState::Run && self.domain_state_observed == DomainState::Ready
    }

    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.heartbeat
    }
}
