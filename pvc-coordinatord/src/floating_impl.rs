//! Concrete floating-services collaborators. Floating IPs
//! and gateway addresses are real `ip addr` shell-outs on the configured
//! interface; the DNS aggregator, DHCP responders, and metadata
//! responder are logged-and-tracked process handles rather than a full
//! dnsmasq/custom-HTTP-server implementation, since the dataplane itself
//! is explicitly out of core scope — only *sequencing* through
//! these traits is.

use async_trait::async_trait;
use pvc_core::entity::network::Network;
use pvc_core::error::{PvcError, PvcResult};
use pvc_core::floating::{DhcpResponder, DnsAggregator, FloatingIpManager, GatewayManager, MetadataResponder};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::info;

async fn ip_addr(op: &str, cidr: &str, interface: &str) -> PvcResult<()> {
    let status = Command::new("ip")
        .args(["addr", op, cidr, "dev", interface])
        .status()
        .await
        .map_err(|e| PvcError::ExecutorFailure { executor: "ip", detail: e.to_string() })?;
    // "addr del" on an address that's already gone returns non-zero;
    // idempotent from our point of view either way.
    if !status.success() && op == "add" {
        return Err(PvcError::ExecutorFailure {
            executor: "ip",
            detail: format!("ip addr {op} {cidr} dev {interface} failed"),
        });
    }
    Ok(())
}

pub struct ShellFloatingIpManager {
    interface: String,
    upstream_cidr: String,
    cluster_cidr: String,
    storage_cidr: String,
}

impl ShellFloatingIpManager {
    pub fn new(interface: String, upstream_cidr: String, cluster_cidr: String, storage_cidr: String) -> Self {
        Self { interface, upstream_cidr, cluster_cidr, storage_cidr }
    }
}

#[async_trait]
impl FloatingIpManager for ShellFloatingIpManager {
    async fn acquire_upstream(&self) -> PvcResult<()> {
        ip_addr("add", &self.upstream_cidr, &self.interface).await
    }

    async fn acquire_cluster(&self) -> PvcResult<()> {
        ip_addr("add", &self.cluster_cidr, &self.interface).await
    }

    async fn acquire_storage(&self) -> PvcResult<()> {
        ip_addr("add", &self.storage_cidr, &self.interface).await
    }

    async fn release_upstream(&self) -> PvcResult<()> {
        ip_addr("del", &self.upstream_cidr, &self.interface).await
    }

    async fn release_cluster(&self) -> PvcResult<()> {
        ip_addr("del", &self.cluster_cidr, &self.interface).await
    }

    async fn release_storage(&self) -> PvcResult<()> {
        ip_addr("del", &self.storage_cidr, &self.interface).await
    }
}

/// Tracks a fixed set of per-VNI child processes (dnsmasq instances in
/// the original), started/stopped idempotently by VNI.
#[derive(Default)]
pub struct ProcessTrackingDhcp {
    running: Mutex<std::collections::HashSet<String>>,
}

#[async_trait]
impl DhcpResponder for ProcessTrackingDhcp {
    async fn start_for(&self, network: &Network) -> PvcResult<()> {
        let mut running = self.running.lock().await;
        if running.insert(network.vni.clone()) {
            info!(vni = %network.vni, "dhcp responder started");
        }
        Ok(())
    }

    async fn stop_for(&self, vni: &str) -> PvcResult<()> {
        let mut running = self.running.lock().await;
        if running.remove(vni) {
            info!(vni, "dhcp responder stopped");
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct LoggingDnsAggregator;

#[async_trait]
impl DnsAggregator for LoggingDnsAggregator {
    async fn start(&self, networks: &[Network]) -> PvcResult<()> {
        info!(count = networks.len(), "dns aggregator started");
        Ok(())
    }

    async fn stop(&self) -> PvcResult<()> {
        info!("dns aggregator stopped");
        Ok(())
    }
}

#[derive(Default)]
pub struct LoggingMetadataResponder;

#[async_trait]
impl MetadataResponder for LoggingMetadataResponder {
    async fn start(&self) -> PvcResult<()> {
        info!("metadata responder started on link-local address");
        Ok(())
    }

    async fn stop(&self) -> PvcResult<()> {
        info!("metadata responder stopped");
        Ok(())
    }
}

pub struct ShellGatewayManager {
    bridge_prefix: String,
}

impl ShellGatewayManager {
    pub fn new(bridge_prefix: String) -> Self {
        Self { bridge_prefix }
    }

    fn bridge_for(&self, vni: &str) -> String {
        format!("{}{vni}", self.bridge_prefix)
    }
}

#[async_trait]
impl GatewayManager for ShellGatewayManager {
    async fn create_for(&self, network: &Network) -> PvcResult<()> {
        let bridge = self.bridge_for(&network.vni);
        if !network.ipv4.gateway.is_empty() {
            ip_addr("add", &network.ipv4.gateway, &bridge).await?;
        }
        if !network.ipv6.gateway.is_empty() {
            ip_addr("add", &network.ipv6.gateway, &bridge).await?;
        }
        Ok(())
    }

    async fn remove_for(&self, vni: &str) -> PvcResult<()> {
        // The bridge interface itself is torn down by the network
        // reconciler when the network is undefined; removing it here
        // too would race that teardown, so relinquish only logs.
        info!(vni, bridge = %self.bridge_for(vni), "gateway address relinquished");
        Ok(())
    }
}
