//! Cluster configuration.
//!
//! Loaded from a TOML file and overridable by CLI flags the same way the
//! teacher's `mvirt-api::main::Args` layers `clap`-derive flags over
//! defaults; the struct itself is read-only for the process lifetime, a
//! reload requires a daemon restart.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::placement::Selector;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Root path this cluster's coordination tree lives under.
    pub coordination_root: String,
    /// Coordination ensemble connection string (`host:port,host:port,...`).
    pub coordination_connect: String,
    pub coordination_session_timeout_secs: u64,

    /// Fencing monitor interval.
    pub fence_monitor_interval_secs: u64,
    /// Heartbeat age past which a node is considered unreachable.
    pub fence_threshold_secs: u64,
    /// IPMI power-status read attempts before declaring a node unreachable.
    pub fence_retries: u32,
    /// Whether to power the node back on after a confirmed fence.
    pub fence_power_on_after: bool,
    /// Cool-off a fenced node must clear (daemon_state=run plus this
    /// window) before it may retake the primary leadership.
    pub fence_cooloff_secs: u64,

    /// Cluster-default selector used when a domain's `node_selector` is
    /// `none`.
    pub default_selector: Selector,

    /// Guest shutdown timeout for the `shutdown` migration method.
    pub migration_shutdown_timeout_secs: u64,

    /// Grace window reconcilers get to drain in-flight work before
    /// in-flight tasks are cancelled.
    pub shutdown_grace_secs: u64,

    /// Size of the per-node task worker pool.
    pub task_worker_pool_size: usize,

    /// Network interface floating IPv4/v6 addresses are acquired on.
    pub floating_interface: String,
    /// Upstream floating IP/CIDR acquired on [`Self::floating_interface`].
    pub floating_upstream_cidr: String,
    /// Cluster floating IP/CIDR acquired on [`Self::floating_interface`].
    pub floating_cluster_cidr: String,
    /// Storage floating IP/CIDR acquired on [`Self::floating_interface`].
    pub floating_storage_cidr: String,
    /// Bridge name prefix per-network gateway addresses are created on
    ///, e.g. `vmbr` + vni.
    pub bridge_prefix: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            coordination_root: "/pvc".to_string(),
            coordination_connect: "127.0.0.1:2181".to_string(),
            coordination_session_timeout_secs: 10,
            fence_monitor_interval_secs: 5,
            fence_threshold_secs: 30,
            fence_retries: 3,
            fence_power_on_after: true,
            fence_cooloff_secs: 60,
            default_selector: Selector::Mem,
            migration_shutdown_timeout_secs: 180,
            shutdown_grace_secs: 30,
            task_worker_pool_size: 1,
            floating_interface: "brcluster".to_string(),
            floating_upstream_cidr: String::new(),
            floating_cluster_cidr: String::new(),
            floating_storage_cidr: String::new(),
            bridge_prefix: "vmbr".to_string(),
        }
    }
}

impl ClusterConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn fence_threshold(&self) -> Duration {
        Duration::from_secs(self.fence_threshold_secs)
    }

    pub fn fence_cooloff(&self) -> Duration {
        Duration::from_secs(self.fence_cooloff_secs)
    }

    pub fn fence_monitor_interval(&self) -> Duration {
        Duration::from_secs(self.fence_monitor_interval_secs)
    }

    pub fn migration_shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.migration_shutdown_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = ClusterConfig::default();
        assert_eq!(cfg.task_worker_pool_size, 1);
        assert_eq!(cfg.default_selector, Selector::Mem);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let cfg = ClusterConfig::from_toml_str(r#"fence_threshold_secs = 45"#).unwrap();
        assert_eq!(cfg.fence_threshold_secs, 45);
        assert_eq!(cfg.task_worker_pool_size, 1);
    }
}
