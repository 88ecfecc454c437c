//! Floating Services Manager. On becoming primary, brings up
//! upstream/cluster/storage floating IPs, the DHCP/DNS aggregator, and
//! the metadata responder, in order, each step revertible; tears them
//! down in reverse order on relinquish. Every step must be safe to run
//! twice, since takeover can be interrupted.
//!
//! The actual network dataplane (floating IP plumbing, DHCP/DNS
//! daemons, the metadata HTTP listener) is an external collaborator
//! behind the traits below; this module only owns
//! *sequencing*.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::entity::domain::Domain;
use crate::entity::network::Network;
use crate::error::PvcResult;

/// Acquires/releases the cluster's floating IPv4/v6 addresses (upstream,
/// cluster, storage) on the configured interface.
#[async_trait]
pub trait FloatingIpManager: Send + Sync {
    async fn acquire_upstream(&self) -> PvcResult<()>;
    async fn acquire_cluster(&self) -> PvcResult<()>;
    async fn acquire_storage(&self) -> PvcResult<()>;
    async fn release_upstream(&self) -> PvcResult<()>;
    async fn release_cluster(&self) -> PvcResult<()>;
    async fn release_storage(&self) -> PvcResult<()>;
}

/// Cluster DNS aggregator, started for all managed networks at once.
#[async_trait]
pub trait DnsAggregator: Send + Sync {
    async fn start(&self, networks: &[Network]) -> PvcResult<()>;
    async fn stop(&self) -> PvcResult<()>;
}

/// Per-network DHCP responder: one per managed VNI,
/// bound to each managed bridge, publishing leases back into
/// coordination state.
#[async_trait]
pub trait DhcpResponder: Send + Sync {
    async fn start_for(&self, network: &Network) -> PvcResult<()>;
    async fn stop_for(&self, vni: &str) -> PvcResult<()>;
}

/// The link-local metadata responder: answers with
/// the requesting VM's UUID, name, profile, and userdata based on
/// source-IP -> MAC -> VM lookup.
#[async_trait]
pub trait MetadataResponder: Send + Sync {
    async fn start(&self) -> PvcResult<()>;
    async fn stop(&self) -> PvcResult<()>;
}

/// One NIC row: the source-IP -> MAC -> VM join the metadata responder
/// needs.
#[derive(Debug, Clone)]
pub struct Nic {
    pub ip: String,
    pub mac: String,
    pub domain_uuid: String,
}

/// Pure lookup the metadata responder calls on every request: given the
/// requesting VM's source IP, find the domain it belongs to. Expressed
/// as a function over the NIC/Domain tables rather than a live socket
/// read so it is unit-testable without a network stack.
pub fn resolve_requester<'a>(nics: &[Nic], domains: &'a [Domain], source_ip: &str) -> Option<&'a Domain> {
    let nic = nics.iter().find(|n| n.ip == source_ip)?;
    domains.iter().find(|d| d.uuid == nic.domain_uuid)
}

/// Creates/removes per-network gateway addresses on the bridge
/// interfaces.
#[async_trait]
pub trait GatewayManager: Send + Sync {
    async fn create_for(&self, network: &Network) -> PvcResult<()>;
    async fn remove_for(&self, vni: &str) -> PvcResult<()>;
}

/// Everything the floating-services manager needs to enumerate the
/// cluster's managed networks. Implemented by the coordinator's entity
/// registry.
#[async_trait]
pub trait ManagedNetworkView: Send + Sync {
    async fn managed_networks(&self) -> PvcResult<Vec<Network>>;
}

pub struct FloatingServicesManager {
    ip: Arc<dyn FloatingIpManager>,
    dns: Arc<dyn DnsAggregator>,
    dhcp: Arc<dyn DhcpResponder>,
    metadata: Arc<dyn MetadataResponder>,
    gateway: Arc<dyn GatewayManager>,
    networks: Arc<dyn ManagedNetworkView>,
}

impl FloatingServicesManager {
    pub fn new(
        ip: Arc<dyn FloatingIpManager>,
        dns: Arc<dyn DnsAggregator>,
        dhcp: Arc<dyn DhcpResponder>,
        metadata: Arc<dyn MetadataResponder>,
        gateway: Arc<dyn GatewayManager>,
        networks: Arc<dyn ManagedNetworkView>,
    ) -> Self {
        Self { ip, dns, dhcp, metadata, gateway, networks }
    }

    /// Run the five-step takeover sequence. Each step is
    /// idempotent, so a caller that retries after a partial takeover
    /// (e.g. the process was killed mid-sequence) can simply call this
    /// again from the top.
    pub async fn takeover(&self) -> PvcResult<()> {
        info!("floating services: acquiring upstream floating IP");
        self.ip.acquire_upstream().await?;
        info!("floating services: acquiring cluster floating IP");
        self.ip.acquire_cluster().await?;
        info!("floating services: acquiring storage floating IP");
        self.ip.acquire_storage().await?;

        let networks = self.networks.managed_networks().await?;

        info!("floating services: starting DNS aggregator");
        self.dns.start(&networks).await?;

        for network in &networks {
            info!(vni = %network.vni, "floating services: starting DHCP responder");
            self.dhcp.start_for(network).await?;
        }

        info!("floating services: starting metadata responder");
        self.metadata.start().await?;

        for network in &networks {
            info!(vni = %network.vni, "floating services: creating gateway address");
            self.gateway.create_for(network).await?;
        }

        Ok(())
    }

    /// Reverse of [`Self::takeover`], in strictly reverse order (spec
    /// §4.8: "On relinquish, reverse the order"). Individual step
    /// failures are logged and do not abort the rest of the teardown —
    /// a secondary must never end up advertising any of these services.
    pub async fn relinquish(&self) -> PvcResult<()> {
        let networks = self.networks.managed_networks().await.unwrap_or_default();

        for network in networks.iter().rev() {
            if let Err(e) = self.gateway.remove_for(&network.vni).await {
                warn!(vni = %network.vni, error = %e, "failed to remove gateway address on relinquish");
            }
        }

        if let Err(e) = self.metadata.stop().await {
            warn!(error = %e, "failed to stop metadata responder on relinquish");
        }

        for network in networks.iter().rev() {
            if let Err(e) = self.dhcp.stop_for(&network.vni).await {
                warn!(vni = %network.vni, error = %e, "failed to stop DHCP responder on relinquish");
            }
        }

        if let Err(e) = self.dns.stop().await {
            warn!(error = %e, "failed to stop DNS aggregator on relinquish");
        }

        if let Err(e) = self.ip.release_storage().await {
            warn!(error = %e, "failed to release storage floating IP");
        }
        if let Err(e) = self.ip.release_cluster().await {
            warn!(error = %e, "failed to release cluster floating IP");
        }
        if let Err(e) = self.ip.release_upstream().await {
            warn!(error = %e, "failed to release upstream floating IP");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nic(ip: &str, mac: &str, uuid: &str) -> Nic {
        Nic { ip: ip.to_string(), mac: mac.to_string(), domain_uuid: uuid.to_string() }
    }

    fn domain(uuid: &str) -> Domain {
        Domain {
            uuid: uuid.to_string(),
            name: format!("vm-{uuid}"),
            xml: String::new(),
            state: crate::entity::domain::DomainRunState::Start,
            node: "hvA".to_string(),
            last_node: None,
            failed_reason: None,
            node_limit: Vec::new(),
            node_selector: crate::placement::Selector::Mem,
            node_autostart: true,
            migration_method: crate::entity::domain::MigrationMethod::Live,
            migration_max_downtime_ms: 0,
            profile: String::new(),
            tags: Vec::new(),
            snapshots: Vec::new(),
        }
    }

    #[test]
    fn resolves_requester_by_source_ip_through_mac_to_domain() {
        let nics = vec![nic("10.0.0.5", "aa:bb", "vm-1")];
        let domains = vec![domain("vm-1"), domain("vm-2")];
        let found = resolve_requester(&nics, &domains, "10.0.0.5").unwrap();
        assert_eq!(found.uuid, "vm-1");
    }

    #[test]
    fn unknown_source_ip_resolves_to_nothing() {
        let nics = vec![nic("10.0.0.5", "aa:bb", "vm-1")];
        let domains = vec![domain("vm-1")];
        assert!(resolve_requester(&nics, &domains, "10.0.0.9").is_none());
    }
}
