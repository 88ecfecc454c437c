//! Node-local view over coordination state: read access to the cluster
//! entity tables the node daemon needs (nodes for placement candidates,
//! domains it owns or might take ownership of), plus write access to its
//! own node subtree. Deliberately the same read-assembly shape as
//! `pvc-coordinatord::registry::ClusterRegistry::read_node`, but local to this process rather than the coordinator's.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use pvc_coord::CoordClient;
use pvc_core::entity::domain::Domain;
use pvc_core::entity::node::{CoordinatorState, DaemonState, DomainState, HealthEntry, Node, NodeResources};
use pvc_core::entity::storage::Osd;
use pvc_core::error::{PvcError, PvcResult};
use pvc_schema::{PathKind, Schema};

pub struct NodeView {
    client: Arc<CoordClient>,
    schema: Arc<Schema>,
}

impl NodeView {
    pub fn new(client: Arc<CoordClient>, schema: Arc<Schema>) -> Self {
        Self { client, schema }
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
        self.read_node(name).await?.ok_or_else(|| PvcError::NotFound(format!("node {name}")))
    }

    async fn read_node(&self, name: &str) -> PvcResult<Option<Node>> {
        let daemon_key = self.schema.path(&PathKind::NodeDaemonState(name));
        let daemon_state = match self.client.read(&daemon_key).await {
            Ok(bytes) => serde_json::from_slice::<DaemonState>(&bytes)?,
            Err(pvc_coord::CoordError::NoNode(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let coordinator_state =
            self.read_json_or(&PathKind::NodeCoordinatorState(name), CoordinatorState::None).await?;
        let domain_state_target =
            self.read_json_or(&PathKind::NodeDomainStateTarget(name), DomainState::Ready).await?;
        let domain_state_observed =
            self.read_json_or(&PathKind::NodeDomainStateObserved(name), DomainState::Ready).await?;
        let heartbeat = self.read_json_or(&PathKind::NodeHeartbeat(name), Utc::now()).await?;
        let resources = self.read_json_or(&PathKind::NodeResources(name), NodeResources::default()).await?;
        let running_domains = self.read_json_or(&PathKind::NodeRunningDomains(name), Vec::<String>::new()).await?;
        let health =
            self.read_json_or(&PathKind::NodeHealth(name), HashMap::<String, HealthEntry>::new()).await?;
        let (pvc_version, kernel, arch) = self
            .read_json_or(&PathKind::NodeMeta(name), (String::new(), String::new(), String::new()))
            .await?;

        let overall_health =
            pvc_core::health::node_overall_health(&health.values().map(|h| h.health_delta).collect::<Vec<_>>());

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

    async fn read_json_or<T: serde::de::DeserializeOwned>(&self, kind: &PathKind<'_>, default: T) -> PvcResult<T> {
        let key = self.schema.path(kind);
        match self.client.read(&key).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(pvc_coord::CoordError::NoNode(_)) => Ok(default),
            Err(e) => Err(e.into()),
        }
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

    /// Every VM currently assigned to `node`.
    pub async fn domains_owned_by(&self, node: &str) -> PvcResult<Vec<Domain>> {
        Ok(self.list_domains().await?.into_iter().filter(|d| d.node == node).collect())
    }

    pub async fn write_daemon_state(&self, name: &str, state: DaemonState) -> PvcResult<()> {
        let key = self.schema.path(&PathKind::NodeDaemonState(name));
        self.client.create_parents(&key).await?;
        self.client.write(vec![(key, serde_json::to_vec(&state)?)]).await?;
        Ok(())
    }

    pub async fn write_heartbeat(&self, name: &str) -> PvcResult<()> {
        let key = self.schema.path(&PathKind::NodeHeartbeat(name));
        self.client.create_parents(&key).await?;
        self.client.write(vec![(key, serde_json::to_vec(&Utc::now())?)]).await?;
        Ok(())
    }

    pub async fn write_resources(&self, name: &str, resources: &NodeResources) -> PvcResult<()> {
        let key = self.schema.path(&PathKind::NodeResources(name));
        self.client.create_parents(&key).await?;
        self.client.write(vec![(key, serde_json::to_vec(resources)?)]).await?;
        Ok(())
    }

    pub async fn write_running_domains(&self, name: &str, running: &[String]) -> PvcResult<()> {
        let key = self.schema.path(&PathKind::NodeRunningDomains(name));
        self.client.create_parents(&key).await?;
        self.client.write(vec![(key, serde_json::to_vec(running)?)]).await?;
        Ok(())
    }

    pub async fn write_health(&self, name: &str, health: &BTreeMap<String, HealthEntry>) -> PvcResult<()> {
        let key = self.schema.path(&PathKind::NodeHealth(name));
        self.client.create_parents(&key).await?;
        self.client.write(vec![(key, serde_json::to_vec(health)?)]).await?;
        Ok(())
    }

    pub async fn write_meta(&self, name: &str, pvc_version: &str, kernel: &str, arch: &str) -> PvcResult<()> {
        let key = self.schema.path(&PathKind::NodeMeta(name));
        self.client.create_parents(&key).await?;
        self.client
            .write(vec![(key, serde_json::to_vec(&(pvc_version, kernel, arch))?)])
            .await?;
        Ok(())
    }

    pub async fn put_osd(&self, osd: &Osd) -> PvcResult<()> {
        let key = self.schema.path(&PathKind::Osd(&osd.id.to_string()));
        self.client.create_parents(&key).await?;
        self.client.write(vec![(key, serde_json::to_vec(osd)?)]).await?;
        Ok(())
    }

    pub async fn delete_osd(&self, id: &str) -> PvcResult<()> {
        let key = self.schema.path(&PathKind::Osd(id));
        self.client.delete(&key, false).await?;
        Ok(())
    }

    /// Find the node currently holding `coordinator_state=primary`,
    /// resolving the `primary` task-routing sentinel locally rather than
    /// through the coordinator's in-memory `ClusterRegistry`.
    pub async fn current_primary(&self) -> PvcResult<String> {
        let nodes = self.list_nodes().await?;
        nodes
            .into_iter()
            .find(|n| n.coordinator_state == CoordinatorState::Primary)
            .map(|n| n.name)
            .ok_or_else(|| PvcError::CoordinationLost("no primary currently elected".to_string()))
    }
}
