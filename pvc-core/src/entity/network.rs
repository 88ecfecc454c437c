//! Network entity.

use std::collections::BTreeMap;
use utoipa::ToSchema;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NetworkKind {
    Managed,
    Bridged,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct Ipv4Config {
    pub network: String,
    pub gateway: String,
    pub dhcp_flag: bool,
    pub dhcp_start: String,
    pub dhcp_end: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct Ipv6Config {
    pub network: String,
    pub gateway: String,
    pub dhcp_flag: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AclRule {
    pub description: String,
    pub order: u32,
    pub rule: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct AclLists {
    #[serde(rename = "in")]
    pub inbound: Vec<AclRule>,
    pub out: Vec<AclRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DhcpReservation {
    pub ip: String,
    pub hostname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DhcpLease {
    pub mac: String,
    pub ip: String,
    pub hostname: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// A managed or bridged tenant network, identified by VNI.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Network {
    pub vni: String,
    pub kind: NetworkKind,
    pub mtu: u32,
    pub dns_domain: String,
    pub name_servers: Vec<String>,
    pub ipv4: Ipv4Config,
    pub ipv6: Ipv6Config,
    pub acl: AclLists,
    /// mac -> reservation
    pub dhcp_reservations: BTreeMap<String, DhcpReservation>,
    /// Observed leases, written back by the DHCP responder.
    pub dhcp_leases: BTreeMap<String, DhcpLease>,
}

impl Network {
    /// ACL `order` values must be unique within a direction.
    pub fn acl_orders_are_unique(&self) -> bool {
        has_unique_orders(&self.acl.inbound) && has_unique_orders(&self.acl.out)
    }
}

fn has_unique_orders(rules: &[AclRule]) -> bool {
    let mut seen = std::collections::BTreeSet::new();
    rules.iter().all(|r| seen.insert(r.order))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_acl_order_is_detected() {
        let mut net = Network {
            vni: "100".into(),
            kind: NetworkKind::Managed,
            mtu: 1500,
            dns_domain: "pvc.local".into(),
            name_servers: vec![],
            ipv4: Ipv4Config::default(),
            ipv6: Ipv6Config::default(),
            acl: AclLists::default(),
            dhcp_reservations: BTreeMap::new(),
            dhcp_leases: BTreeMap::new(),
        };
        net.acl.inbound.push(AclRule { description: "a".into(), order: 1, rule: "accept".into() });
        net.acl.inbound.push(AclRule { description: "b".into(), order: 1, rule: "drop".into() });
        assert!(!net.acl_orders_are_unique());
    }
}
