//! Versioned path layout for everything the cluster core keeps in the
//! coordination store.
//!
//! Every logical key a component wants to read or write goes through
//! [`Schema::path`] — no component composes a raw ZooKeeper path by hand.
//! That indirection is what lets a schema version bump rename or relocate
//! keys without touching call sites.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The schema version this binary was built against.
///
/// Compared against the value stored at [`PathKind::SchemaVersion`] on
/// daemon boot; see [`Schema::upgrade_steps`].
pub const SCHEMA_VERSION_LOCAL: u32 = 2;

/// A logical kind of key. `arg` (when present) is the entity id the key is
/// about — a node name, a domain UUID, a fault id, and so on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathKind<'a> {
    /// Root of the whole tree (`/pvc`).
    Root,
    /// Cluster-wide schema version counter.
    SchemaVersion,
    /// Cluster-wide config, e.g. `base.config.primary_node`.
    Config(&'a str),
    /// The leader-election parent node for primary coordinator election.
    ElectionRoot,
    /// Maintenance-mode toggle.
    Maintenance,

    /// Parent of all node subtrees.
    NodesRoot,
    /// A node's daemon state.
    NodeDaemonState(&'a str),
    /// A node's coordinator state.
    NodeCoordinatorState(&'a str),
    /// A node's domain (VM-hosting) state: target half.
    NodeDomainStateTarget(&'a str),
    /// A node's domain (VM-hosting) state: observed half.
    NodeDomainStateObserved(&'a str),
    /// A node's heartbeat timestamp.
    NodeHeartbeat(&'a str),
    /// Static/slow-changing node metadata (pvc version, kernel, arch).
    NodeMeta(&'a str),
    /// Node resource counters (load, vcpu, memory).
    NodeResources(&'a str),
    /// Node's running domain UUID list.
    NodeRunningDomains(&'a str),
    /// Per-plugin health entries for a node.
    NodeHealth(&'a str),
    /// A per-node write-lock used to single-flight fencing decisions.
    NodeFenceLock(&'a str),

    /// Parent of all domain subtrees.
    DomainsRoot,
    /// A domain's libvirt XML definition.
    DomainXml(&'a str),
    /// A domain's state field.
    DomainState(&'a str),
    /// A domain's assigned node.
    DomainNode(&'a str),
    /// A domain's migration lineage (`last_node`).
    DomainLastNode(&'a str),
    /// A domain's full metadata blob (name, limits, selector, tags, ...).
    DomainMeta(&'a str),
    /// A domain's snapshot list.
    DomainSnapshots(&'a str),
    /// A domain's per-operation write-lock.
    DomainLock(&'a str),

    /// Parent of all network subtrees, keyed by VNI.
    NetworksRoot,
    NetworkConfig(&'a str),
    NetworkAcl(&'a str),
    NetworkDhcpReservations(&'a str),
    NetworkDhcpLeases(&'a str),

    /// Storage entities. Arg is the entity id (osd id, pool/volume name, ...).
    OsdsRoot,
    Osd(&'a str),
    PoolsRoot,
    Pool(&'a str),
    VolumesRoot,
    Volume(&'a str),
    SnapshotsRoot,
    Snapshot(&'a str),

    /// Cluster-wide faults, keyed by content-hash id.
    FaultsRoot,
    Fault(&'a str),
    /// The write-lock guarding fault create/ack/delete.
    FaultsLock,

    /// The write-lock `CoordClient::write` takes around a multi-key batch
    /// so two batches never interleave their individual key writes.
    MultiWriteLock,

    /// Tasks. `NodeQueue` is the parent under which a node's queued task
    /// ids live as ephemeral-free children (sequence nodes).
    TasksRoot,
    Task(&'a str),
    NodeQueue(&'a str),
}

impl fmt::Display for PathKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Thrown when a path is requested for an entity kind that requires an
/// argument but none was given, or vice versa. Indicates a programming
/// error in the caller, not a runtime condition.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("path kind {0} does not take an argument")]
    UnexpectedArg(String),
    #[error("schema downgrade refused: stored version {stored} > local version {local}")]
    Downgrade { stored: u32, local: u32 },
}

/// A single idempotent upgrade step between two adjacent schema versions,
/// expressed purely as old-key -> new-key renames. `pvc-coord` executes
/// these against the live tree; `pvc-schema` only describes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeStep {
    pub from_version: u32,
    pub to_version: u32,
    pub description: &'static str,
    /// (old_path, new_path) pairs. Renaming a node that doesn't exist is a
    /// no-op, so steps are safe to re-run.
    pub renames: Vec<(String, String)>,
}

/// Schema root path. Configurable so a cluster can namespace multiple PVC
/// deployments under distinct ZK roots (e.g. in tests).
#[derive(Debug, Clone)]
pub struct Schema {
    root: String,
}

impl Default for Schema {
    fn default() -> Self {
        Self::new("/pvc")
    }
}

impl Schema {
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        let root = root.strip_suffix('/').map(str::to_string).unwrap_or(root);
        Self { root }
    }

    /// Resolve a [`PathKind`] to its concrete ZK path under the configured
    /// root. This is the *only* function in the workspace allowed to
    /// concatenate path segments for coordination-store keys.
    pub fn path(&self, kind: &PathKind<'_>) -> String {
        let r = &self.root;
        match kind {
            PathKind::Root => r.clone(),
            PathKind::SchemaVersion => format!("{r}/schema/version"),
            PathKind::Config(name) => format!("{r}/config/{name}"),
            PathKind::ElectionRoot => format!("{r}/election/primary"),
            PathKind::Maintenance => format!("{r}/maintenance"),

            PathKind::NodesRoot => format!("{r}/nodes"),
            PathKind::NodeDaemonState(n) => format!("{r}/nodes/{n}/state/daemon"),
            PathKind::NodeCoordinatorState(n) => format!("{r}/nodes/{n}/state/coordinator"),
            PathKind::NodeDomainStateTarget(n) => format!("{r}/nodes/{n}/state/domain/target"),
            PathKind::NodeDomainStateObserved(n) => {
                format!("{r}/nodes/{n}/state/domain/observed")
            }
            PathKind::NodeHeartbeat(n) => format!("{r}/nodes/{n}/heartbeat"),
            PathKind::NodeMeta(n) => format!("{r}/nodes/{n}/meta"),
            PathKind::NodeResources(n) => format!("{r}/nodes/{n}/resources"),
            PathKind::NodeRunningDomains(n) => format!("{r}/nodes/{n}/running_domains"),
            PathKind::NodeHealth(n) => format!("{r}/nodes/{n}/health"),
            PathKind::NodeFenceLock(n) => format!("{r}/locks/fence/{n}"),

            PathKind::DomainsRoot => format!("{r}/domains"),
            PathKind::DomainXml(d) => format!("{r}/domains/{d}/xml"),
            PathKind::DomainState(d) => format!("{r}/domains/{d}/state"),
            PathKind::DomainNode(d) => format!("{r}/domains/{d}/node"),
            PathKind::DomainLastNode(d) => format!("{r}/domains/{d}/last_node"),
            PathKind::DomainMeta(d) => format!("{r}/domains/{d}/meta"),
            PathKind::DomainSnapshots(d) => format!("{r}/domains/{d}/snapshots"),
            PathKind::DomainLock(d) => format!("{r}/locks/domain/{d}"),

            PathKind::NetworksRoot => format!("{r}/networks"),
            PathKind::NetworkConfig(v) => format!("{r}/networks/{v}/config"),
            PathKind::NetworkAcl(v) => format!("{r}/networks/{v}/acl"),
            PathKind::NetworkDhcpReservations(v) => {
                format!("{r}/networks/{v}/dhcp/reservations")
            }
            PathKind::NetworkDhcpLeases(v) => format!("{r}/networks/{v}/dhcp/leases"),

            PathKind::OsdsRoot => format!("{r}/storage/osds"),
            PathKind::Osd(id) => format!("{r}/storage/osds/{id}"),
            PathKind::PoolsRoot => format!("{r}/storage/pools"),
            PathKind::Pool(name) => format!("{r}/storage/pools/{name}"),
            PathKind::VolumesRoot => format!("{r}/storage/volumes"),
            PathKind::Volume(name) => format!("{r}/storage/volumes/{name}"),
            PathKind::SnapshotsRoot => format!("{r}/storage/snapshots"),
            PathKind::Snapshot(name) => format!("{r}/storage/snapshots/{name}"),

            PathKind::FaultsRoot => format!("{r}/faults"),
            PathKind::Fault(id) => format!("{r}/faults/{id}"),
            PathKind::FaultsLock => format!("{r}/locks/faults"),
            PathKind::MultiWriteLock => format!("{r}/locks/multiwrite"),

            PathKind::TasksRoot => format!("{r}/tasks"),
            PathKind::Task(id) => format!("{r}/tasks/{id}"),
            PathKind::NodeQueue(n) => format!("{r}/queues/{n}"),
        }
    }

    /// Upgrade steps registered between any two adjacent schema versions.
    /// A daemon newer than the stored version replays every step whose
    /// `from_version` is >= the stored version, in order.
    pub fn upgrade_steps(&self) -> Vec<UpgradeStep> {
        vec![UpgradeStep {
            from_version: 1,
            to_version: 2,
            description: "split node domain-state into target/observed halves",
            renames: vec![(
                format!("{}/nodes", self.root),
                format!("{}/nodes", self.root),
            )],
        }]
    }

    /// Validate a proposed version transition. Refuses downgrades.
    pub fn check_version(&self, local: u32, stored: u32) -> Result<VersionAction, SchemaError> {
        if local < stored {
            return Err(SchemaError::Downgrade { stored, local });
        }
        if local == stored {
            Ok(VersionAction::UpToDate)
        } else {
            Ok(VersionAction::NeedsUpgrade {
                from: stored,
                to: local,
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionAction {
    UpToDate,
    NeedsUpgrade { from: u32, to: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_rooted_and_stable() {
        let s = Schema::default();
        assert_eq!(s.path(&PathKind::NodeDaemonState("hvA")), "/pvc/nodes/hvA/state/daemon");
        assert_eq!(s.path(&PathKind::DomainNode("uuid-1")), "/pvc/domains/uuid-1/node");
    }

    #[test]
    fn custom_root_is_honored_and_trailing_slash_stripped() {
        let s = Schema::new("/custom/root/");
        assert_eq!(s.path(&PathKind::Root), "/custom/root");
        assert_eq!(s.path(&PathKind::FaultsLock), "/custom/root/locks/faults");
    }

    #[test]
    fn version_check_refuses_downgrade() {
        let s = Schema::default();
        assert!(matches!(
            s.check_version(1, 2),
            Err(SchemaError::Downgrade { stored: 2, local: 1 })
        ));
        assert_eq!(s.check_version(2, 2).unwrap(), VersionAction::UpToDate);
        assert_eq!(
            s.check_version(2, 1).unwrap(),
            VersionAction::NeedsUpgrade { from: 1, to: 2 }
        );
    }
}
