//! In-memory projection of cluster entity state, refreshed
//! from the coordination tree on a short poll interval plus on-demand
//! reads for anything about to be mutated. This is the coordinator's
//! concrete implementation of the several narrow view traits `pvc-core`
//! declares (`FenceClusterView`, `ManagedNetworkView`, `PrimaryResolver`)
//! and the backing store for the REST handlers.
//!
//! Nodes are assembled from several keys each independently owned
//! (daemon state, resources, health, ...); domains, networks and faults are kept as single JSON
//! blobs under their schema path, which keeps read-modify-write call
//! sites simple at the cost of per-field watch granularity — a deliberate
//! simplification over the full per-attribute watch wiring
//! `pvc-core::entity::WatchedEntity` supports, recorded in `DESIGN.md`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use pvc_coord::CoordClient;
use pvc_core::entity::domain::Domain;
use pvc_core::entity::fault::Fault;
use pvc_core::entity::network::{Network, NetworkKind};
use pvc_core::entity::node::{CoordinatorState, DaemonState, DomainState, HealthEntry, Node, NodeResources};
use pvc_core::error::{PvcError, PvcResult};
use pvc_core::fencing::FenceClusterView;
use pvc_core::floating::ManagedNetworkView;
use pvc_core::tasks::PrimaryResolver;
use pvc_schema::{PathKind, Schema};
use tokio::sync::RwLock;

pub struct ClusterRegistry {
    client: Arc<CoordClient>,
    schema: Arc<Schema>,
    current_primary: RwLock<Option<String>>,
}

impl ClusterRegistry {
    pub fn new(client: Arc<CoordClient>, schema: Arc<Schema>) -> Self {
        Self { client, schema, current_primary: RwLock::new(None) }
    }

    /// Called by the election driver whenever this process wins or loses
    /// leadership, so `PrimaryResolver` always answers from memory
    /// rather than re-reading the election tree on every task submission.
    pub async fn set_current_primary(&self, node: Option<String>) {
        *self.current_primary.write().await = node;
    }

    pub async fn list_nodes(&self) -> PvcResult<Vec<Node>> {
        let root = self.schema.path(&PathKind::NodesRoot);
        let names = self.client.children(&root).await?;
        let mut nodes = Vec::with_capacity(names.len());
        for name in names {
            if let Some(node) = self.read_node(&name).await? {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    pub async fn get_node(&self, name: &str) -> PvcResult<Node> {
        self.read_node(name)
            .await?
            .ok_or_else(|| PvcError::NotFound(format!("node {name}")))
    }

    async fn read_node(&self, name: &str) -> PvcResult<Option<Node>> {
        let daemon_key = self.schema.path(&PathKind::NodeDaemonState(name));
        let daemon_state = match self.client.read(&daemon_key).await {
            Ok(bytes) => serde_json::from_slice::<DaemonState>(&bytes)?,
            Err(pvc_coord::CoordError::NoNode(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let coordinator_state = self
            .read_json_or(&PathKind::NodeCoordinatorState(name), CoordinatorState::None)
            .await?;
        let domain_state_target = self
            .read_json_or(&PathKind::NodeDomainStateTarget(name), DomainState::Ready)
            .await?;
        let domain_state_observed = self
            .read_json_or(&PathKind::NodeDomainStateObserved(name), DomainState::Ready)
            .await?;
        let heartbeat = self
            .read_json_or(&PathKind::NodeHeartbeat(name), chrono::Utc::now())
            .await?;
        let resources = self
            .read_json_or(&PathKind::NodeResources(name), NodeResources::default())
            .await?;
        let running_domains = self
            .read_json_or(&PathKind::NodeRunningDomains(name), Vec::<String>::new())
            .await?;
        let health = self
            .read_json_or(&PathKind::NodeHealth(name), HashMap::<String, HealthEntry>::new())
            .await?;
        let (pvc_version, kernel, arch) = self
            .read_json_or(&PathKind::NodeMeta(name), (String::new(), String::new(), String::new()))
            .await?;

        let overall_health = pvc_core::health::node_overall_health(
            &health.values().map(|h| h.health_delta).collect::<Vec<_>>(),
        );

        let mut node = Node::new(name);
        node.daemon_state = daemon_state;
        node.coordinator_state = coordinator_state;
        node.domain_state_target = domain_state_target;
        node.domain_state_observed = domain_state_observed;
        node.heartbeat = heartbeat;
        node.pvc_version = pvc_version;
        node.kernel = kernel;
        node.arch = arch;
        node.resources = resources;
        node.running_domains = running_domains;
        node.health = health.into_iter().collect();
        node.overall_health = overall_health;
        Ok(Some(node))
    }

    async fn read_json_or<T: serde::de::DeserializeOwned>(
        &self,
        kind: &PathKind<'_>,
        default: T,
    ) -> PvcResult<T> {
        let key = self.schema.path(kind);
        match self.client.read(&key).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(pvc_coord::CoordError::NoNode(_)) => Ok(default),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn write_coordinator_state(&self, name: &str, state: CoordinatorState) -> PvcResult<()> {
        let key = self.schema.path(&PathKind::NodeCoordinatorState(name));
        self.client.write(vec![(key, serde_json::to_vec(&state)?)]).await?;
        Ok(())
    }

    pub async fn write_daemon_state(&self, name: &str, state: DaemonState) -> PvcResult<()> {
        let key = self.schema.path(&PathKind::NodeDaemonState(name));
        self.client.write(vec![(key, serde_json::to_vec(&state)?)]).await?;
        Ok(())
    }

    /// `POST /node/<n>/domain-state`: request a new target `domain_state`
    /// for `n`, validated against its last-observed half exactly as
    /// `pvc_core::state_machine::DomainStateReconciler::request` does on
    /// the node side — the coordinator only ever writes the target, it
    /// never runs the flush/unflush work itself.
    pub async fn request_domain_state(&self, name: &str, to: DomainState) -> PvcResult<()> {
        let observed = self
            .read_json_or(&PathKind::NodeDomainStateObserved(name), DomainState::Ready)
            .await?;
        pvc_core::state_machine::validate_domain_transition(observed, to)?;
        let key = self.schema.path(&PathKind::NodeDomainStateTarget(name));
        self.client.write(vec![(key, serde_json::to_vec(&to)?)]).await?;
        Ok(())
    }

    /// `POST /node/<n>/coordinator-state`: request a handoff. Requesting `primary` writes `takeover`, which the
    /// election driver's own watch loop advances to `primary` once the
    /// incumbent has relinquished; requesting `secondary` writes it
    /// directly. Either way this call only ever writes the *target*
    /// node's state — the incumbent's own `primary -> relinquish` edge is
    /// driven by the election driver observing the new `takeover`, not by
    /// this handler touching two nodes at once.
    pub async fn request_coordinator_state(&self, name: &str, to: CoordinatorState) -> PvcResult<()> {
        let current = self
            .read_json_or(&PathKind::NodeCoordinatorState(name), CoordinatorState::None)
            .await?;
        let requested = match to {
            CoordinatorState::Primary => CoordinatorState::Takeover,
            other => other,
        };
        pvc_core::state_machine::validate_coordinator_transition(current, requested)?;
        self.write_coordinator_state(name, requested).await
    }

    pub async fn get_domain(&self, uuid: &str) -> PvcResult<Domain> {
        let key = self.schema.path(&PathKind::DomainMeta(uuid));
        let bytes = self.client.read(&key).await.map_err(|e| match e {
            pvc_coord::CoordError::NoNode(_) => PvcError::NotFound(format!("domain {uuid}")),
            other => other.into(),
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn list_domains(&self) -> PvcResult<Vec<Domain>> {
        let root = self.schema.path(&PathKind::DomainsRoot);
        let uuids = self.client.children(&root).await?;
        let mut domains = Vec::with_capacity(uuids.len());
        for uuid in uuids {
            domains.push(self.get_domain(&uuid).await?);
        }
        Ok(domains)
    }

    pub async fn put_domain(&self, domain: &Domain) -> PvcResult<()> {
        let key = self.schema.path(&PathKind::DomainMeta(&domain.uuid));
        self.client.write(vec![(key, serde_json::to_vec(domain)?)]).await?;
        Ok(())
    }

    pub async fn delete_domain(&self, uuid: &str) -> PvcResult<()> {
        let key = self.schema.path(&PathKind::DomainMeta(uuid));
        self.client.delete(&key, true).await?;
        Ok(())
    }

    pub async fn list_networks(&self) -> PvcResult<Vec<Network>> {
        let root = self.schema.path(&PathKind::NetworksRoot);
        let vnis = self.client.children(&root).await?;
        let mut networks = Vec::with_capacity(vnis.len());
        for vni in vnis {
            let key = self.schema.path(&PathKind::NetworkConfig(&vni));
            if let Ok(bytes) = self.client.read(&key).await {
                networks.push(serde_json::from_slice::<Network>(&bytes)?);
            }
        }
        Ok(networks)
    }

    pub async fn put_network(&self, network: &Network) -> PvcResult<()> {
        let key = self.schema.path(&PathKind::NetworkConfig(&network.vni));
        self.client.write(vec![(key, serde_json::to_vec(network)?)]).await?;
        Ok(())
    }

    pub async fn list_faults(&self) -> PvcResult<Vec<Fault>> {
        let root = self.schema.path(&PathKind::FaultsRoot);
        let ids = self.client.children(&root).await?;
        let mut faults = Vec::with_capacity(ids.len());
        for id in ids {
            let key = self.schema.path(&PathKind::Fault(&id));
            if let Ok(bytes) = self.client.read(&key).await {
                faults.push(serde_json::from_slice::<Fault>(&bytes)?);
            }
        }
        Ok(faults)
    }

    pub async fn get_fault(&self, id: &str) -> PvcResult<Fault> {
        let key = self.schema.path(&PathKind::Fault(id));
        let bytes = self.client.read(&key).await.map_err(|e| match e {
            pvc_coord::CoordError::NoNode(_) => PvcError::NotFound(format!("fault {id}")),
            other => other.into(),
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Create-or-update a fault under the cluster-wide faults write-lock.
    pub async fn upsert_fault(&self, mut fault: Fault) -> PvcResult<Fault> {
        let lock_path = self.schema.path(&PathKind::FaultsLock);
        let guard = pvc_coord::write_lock(&self.client, &lock_path).await?;

        if let Ok(existing) = self.get_fault(&fault.id).await {
            fault.first_reported = existing.first_reported;
        }
        let key = self.schema.path(&PathKind::Fault(&fault.id));
        self.client.write(vec![(key, serde_json::to_vec(&fault)?)]).await?;

        guard.release().await?;
        Ok(fault)
    }

    pub async fn acknowledge_fault(&self, id: &str) -> PvcResult<Fault> {
        let lock_path = self.schema.path(&PathKind::FaultsLock);
        let guard = pvc_coord::write_lock(&self.client, &lock_path).await?;

        let mut fault = self.get_fault(id).await?;
        fault.acknowledge();
        let key = self.schema.path(&PathKind::Fault(id));
        self.client.write(vec![(key, serde_json::to_vec(&fault)?)]).await?;

        guard.release().await?;
        Ok(fault)
    }

    pub async fn list_osds(&self) -> PvcResult<Vec<pvc_core::entity::storage::Osd>> {
        let root = self.schema.path(&PathKind::OsdsRoot);
        let ids = self.client.children(&root).await?;
        let mut osds = Vec::with_capacity(ids.len());
        for id in ids {
            let key = self.schema.path(&PathKind::Osd(&id));
            if let Ok(bytes) = self.client.read(&key).await {
                osds.push(serde_json::from_slice(&bytes)?);
            }
        }
        Ok(osds)
    }

    pub async fn get_osd(&self, id: &str) -> PvcResult<pvc_core::entity::storage::Osd> {
        let key = self.schema.path(&PathKind::Osd(id));
        let bytes = self.client.read(&key).await.map_err(|e| match e {
            pvc_coord::CoordError::NoNode(_) => PvcError::NotFound(format!("osd {id}")),
            other => other.into(),
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn put_osd(&self, osd: &pvc_core::entity::storage::Osd) -> PvcResult<()> {
        let key = self.schema.path(&PathKind::Osd(&osd.id.to_string()));
        self.client.write(vec![(key, serde_json::to_vec(osd)?)]).await?;
        Ok(())
    }

    pub async fn delete_osd(&self, id: &str) -> PvcResult<()> {
        let key = self.schema.path(&PathKind::Osd(id));
        self.client.delete(&key, false).await?;
        Ok(())
    }

    pub async fn list_pools(&self) -> PvcResult<Vec<pvc_core::entity::storage::Pool>> {
        let root = self.schema.path(&PathKind::PoolsRoot);
        let names = self.client.children(&root).await?;
        let mut pools = Vec::with_capacity(names.len());
        for name in names {
            let key = self.schema.path(&PathKind::Pool(&name));
            if let Ok(bytes) = self.client.read(&key).await {
                pools.push(serde_json::from_slice(&bytes)?);
            }
        }
        Ok(pools)
    }

    pub async fn get_pool(&self, name: &str) -> PvcResult<pvc_core::entity::storage::Pool> {
        let key = self.schema.path(&PathKind::Pool(name));
        let bytes = self.client.read(&key).await.map_err(|e| match e {
            pvc_coord::CoordError::NoNode(_) => PvcError::NotFound(format!("pool {name}")),
            other => other.into(),
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn put_pool(&self, pool: &pvc_core::entity::storage::Pool) -> PvcResult<()> {
        let key = self.schema.path(&PathKind::Pool(&pool.name));
        self.client.write(vec![(key, serde_json::to_vec(pool)?)]).await?;
        Ok(())
    }

    pub async fn delete_pool(&self, name: &str) -> PvcResult<()> {
        let key = self.schema.path(&PathKind::Pool(name));
        self.client.delete(&key, false).await?;
        Ok(())
    }

    pub async fn list_volumes(&self) -> PvcResult<Vec<pvc_core::entity::storage::Volume>> {
        let root = self.schema.path(&PathKind::VolumesRoot);
        let names = self.client.children(&root).await?;
        let mut volumes = Vec::with_capacity(names.len());
        for name in names {
            let key = self.schema.path(&PathKind::Volume(&name));
            if let Ok(bytes) = self.client.read(&key).await {
                volumes.push(serde_json::from_slice(&bytes)?);
            }
        }
        Ok(volumes)
    }

    pub async fn get_volume(&self, key_name: &str) -> PvcResult<pvc_core::entity::storage::Volume> {
        let key = self.schema.path(&PathKind::Volume(key_name));
        let bytes = self.client.read(&key).await.map_err(|e| match e {
            pvc_coord::CoordError::NoNode(_) => PvcError::NotFound(format!("volume {key_name}")),
            other => other.into(),
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn put_volume(&self, key_name: &str, volume: &pvc_core::entity::storage::Volume) -> PvcResult<()> {
        let key = self.schema.path(&PathKind::Volume(key_name));
        self.client.write(vec![(key, serde_json::to_vec(volume)?)]).await?;
        Ok(())
    }

    pub async fn delete_volume(&self, key_name: &str) -> PvcResult<()> {
        let key = self.schema.path(&PathKind::Volume(key_name));
        self.client.delete(&key, false).await?;
        Ok(())
    }

    pub async fn list_snapshots(&self) -> PvcResult<Vec<pvc_core::entity::storage::StorageSnapshot>> {
        let root = self.schema.path(&PathKind::SnapshotsRoot);
        let names = self.client.children(&root).await?;
        let mut snapshots = Vec::with_capacity(names.len());
        for name in names {
            let key = self.schema.path(&PathKind::Snapshot(&name));
            if let Ok(bytes) = self.client.read(&key).await {
                snapshots.push(serde_json::from_slice(&bytes)?);
            }
        }
        Ok(snapshots)
    }

    pub async fn put_snapshot(
        &self,
        key_name: &str,
        snapshot: &pvc_core::entity::storage::StorageSnapshot,
    ) -> PvcResult<()> {
        let key = self.schema.path(&PathKind::Snapshot(key_name));
        self.client.write(vec![(key, serde_json::to_vec(snapshot)?)]).await?;
        Ok(())
    }

    pub async fn delete_snapshot(&self, key_name: &str) -> PvcResult<()> {
        let key = self.schema.path(&PathKind::Snapshot(key_name));
        self.client.delete(&key, false).await?;
        Ok(())
    }

    pub async fn delete_fault(&self, id: &str) -> PvcResult<()> {
        let lock_path = self.schema.path(&PathKind::FaultsLock);
        let guard = pvc_coord::write_lock(&self.client, &lock_path).await?;

        let key = self.schema.path(&PathKind::Fault(id));
        self.client.delete(&key, false).await?;

        guard.release().await?;
        Ok(())
    }
}

#[async_trait]
impl FenceClusterView for ClusterRegistry {
    async fn nodes(&self) -> PvcResult<Vec<Node>> {
        self.list_nodes().await
    }

    async fn domains_on_node(&self, node: &str) -> PvcResult<Vec<Domain>> {
        Ok(self
            .list_domains()
            .await?
            .into_iter()
            .filter(|d| d.node == node)
            .collect())
    }

    async fn mark_fenced(&self, node: &str) -> PvcResult<()> {
        self.write_daemon_state(node, DaemonState::Fenced).await
    }

    async fn reassign_domain(&self, domain: &Domain, new_node: &str) -> PvcResult<()> {
        let mut domain = domain.clone();
        domain.node = new_node.to_string();
        domain.state = pvc_core::entity::domain::DomainRunState::Start;
        self.put_domain(&domain).await
    }

    async fn stop_domain_in_place(&self, domain: &Domain) -> PvcResult<()> {
        let mut domain = domain.clone();
        domain.state = pvc_core::entity::domain::DomainRunState::Stop;
        self.put_domain(&domain).await
    }
}

#[async_trait]
impl ManagedNetworkView for ClusterRegistry {
    async fn managed_networks(&self) -> PvcResult<Vec<Network>> {
        Ok(self
            .list_networks()
            .await?
            .into_iter()
            .filter(|n| n.kind == NetworkKind::Managed)
            .collect())
    }
}

#[async_trait]
impl PrimaryResolver for ClusterRegistry {
    async fn current_primary(&self) -> PvcResult<String> {
        self.current_primary
            .read()
            .await
            .clone()
            .ok_or_else(|| PvcError::CoordinationLost("no primary currently elected".to_string()))
    }
}
