//! Fencing Monitor. Runs only on the primary. Never marks a
//! node fenced, and never reassigns its VMs, without a confirmed IPMI
//! power action — "split-brain must not be traded for availability."

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pvc_coord::CoordClient;
use pvc_schema::{PathKind, Schema};
use tracing::{info, warn};

use crate::entity::domain::{Domain, DomainRunState};
use crate::entity::node::Node;
use crate::error::PvcResult;
use crate::placement::{self, PlacementRequest, Selector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerStatus {
    On,
    Off,
    Unreachable,
}

/// IPMI/BMC power control, an external collaborator. `pvc-noded`
/// and `pvc-coordinatord` supply a shell-out implementation; tests supply
/// a fake.
#[async_trait]
pub trait IpmiFencer: Send + Sync {
    async fn power_status(&self, node: &str) -> PvcResult<PowerStatus>;
    async fn power_off(&self, node: &str) -> PvcResult<()>;
    async fn power_on(&self, node: &str) -> PvcResult<()>;
}

/// Everything about cluster entity state the monitor needs beyond the
/// coordination client itself: the live node/domain tables and the
/// ability to write a reassignment. Implemented by `pvc-coordinatord`
/// against its in-memory entity registry.
#[async_trait]
pub trait FenceClusterView: Send + Sync {
    async fn nodes(&self) -> PvcResult<Vec<Node>>;
    async fn domains_on_node(&self, node: &str) -> PvcResult<Vec<Domain>>;
    async fn mark_fenced(&self, node: &str) -> PvcResult<()>;
    async fn reassign_domain(&self, domain: &Domain, new_node: &str) -> PvcResult<()>;
    async fn stop_domain_in_place(&self, domain: &Domain) -> PvcResult<()>;
}

pub struct FencingMonitor {
    client: Arc<CoordClient>,
    schema: Arc<Schema>,
    view: Arc<dyn FenceClusterView>,
    fencer: Arc<dyn IpmiFencer>,
    fence_threshold: Duration,
    fence_retries: u32,
    power_on_after: bool,
    default_selector: Selector,
}

impl FencingMonitor {
    pub fn new(
        client: Arc<CoordClient>,
        schema: Arc<Schema>,
        view: Arc<dyn FenceClusterView>,
        fencer: Arc<dyn IpmiFencer>,
        fence_threshold: Duration,
        fence_retries: u32,
        power_on_after: bool,
        default_selector: Selector,
    ) -> Self {
        Self {
            client,
            schema,
            view,
            fencer,
            fence_threshold,
            fence_retries,
            power_on_after,
            default_selector,
        }
    }

    /// One pass over every node. Single-flight per node: a per-node
    /// write-lock ensures only one fencing attempt against a
    /// given node is ever in flight, even if two monitor ticks overlap.
    pub async fn tick(&self, now: DateTime<Utc>) -> PvcResult<()> {
        let nodes = self.view.nodes().await?;
        for node in &nodes {
            if node.daemon_state == crate::entity::node::DaemonState::Fenced {
                continue;
            }
            if node.heartbeat_age(now).num_seconds() as u64 <= self.fence_threshold.as_secs() {
                continue;
            }
            self.fence_one(&node.name).await?;
        }
        Ok(())
    }

    async fn fence_one(&self, node: &str) -> PvcResult<()> {
        let lock_path = self.schema.path(&PathKind::NodeFenceLock(node));
        let guard = pvc_coord::write_lock(&self.client, &lock_path).await?;

        let mut confirmed_unreachable = false;
        for attempt in 0..self.fence_retries {
            match self.fencer.power_status(node).await {
                Ok(PowerStatus::Unreachable) => {
                    confirmed_unreachable = true;
                    break;
                }
                Ok(_) => {
                    info!(node, attempt, "node BMC reachable, not fencing");
                    guard.release().await?;
                    return Ok(());
                }
                Err(e) => warn!(node, attempt, error = %e, "IPMI power-status probe failed"),
            }
        }

        if !confirmed_unreachable {
            warn!(node, "could not confirm node unreachable, refusing to fence");
            guard.release().await?;
            return Ok(());
        }

        if let Err(e) = self.fencer.power_off(node).await {
            warn!(node, error = %e, "IPMI power-off failed, node NOT marked fenced");
            guard.release().await?;
            return Ok(());
        }

        if self.power_on_after {
            if let Err(e) = self.fencer.power_on(node).await {
                warn!(node, error = %e, "post-fence power-on failed (continuing: fence itself confirmed)");
            }
        }

        self.view.mark_fenced(node).await?;
        info!(node, "fence confirmed, running fence recovery");
        self.recover(node).await?;

        guard.release().await?;
        Ok(())
    }

    /// Fence recovery: reassign every VM the fenced
    /// node was running, unless it was explicitly not meant to restart.
    async fn recover(&self, fenced_node: &str) -> PvcResult<()> {
        let domains = self.view.domains_on_node(fenced_node).await?;
        let candidates = self.view.nodes().await?;

        for action in plan_recovery(&domains, &candidates, fenced_node, self.default_selector) {
            match action {
                RecoveryAction::Reassign { domain, target } => {
                    self.view.reassign_domain(&domain, &target).await?
                }
                RecoveryAction::StopInPlace { domain } => {
                    self.view.stop_domain_in_place(&domain).await?
                }
                RecoveryAction::Failed { domain, reason } => {
                    warn!(vm = %domain.uuid, %reason, "fence recovery placement failed")
                }
            }
        }
        Ok(())
    }
}

/// What fence recovery decided to do with one VM. Kept separate from
/// `FencingMonitor::recover` so the decision is testable
/// without a live coordination session.
enum RecoveryAction {
    Reassign { domain: Domain, target: String },
    StopInPlace { domain: Domain },
    Failed { domain: Domain, reason: String },
}

fn plan_recovery(
    domains: &[Domain],
    candidates: &[Node],
    fenced_node: &str,
    default_selector: Selector,
) -> Vec<RecoveryAction> {
    domains
        .iter()
        .filter(|d| matches!(d.state, DomainRunState::Start | DomainRunState::Migrate))
        .map(|domain| {
            if !domain.node_autostart {
                return RecoveryAction::StopInPlace { domain: domain.clone() };
            }
            let request = PlacementRequest {
                node_limit: &domain.node_limit,
                selector: domain.node_selector,
                forbidden_node: Some(fenced_node),
            };
            match placement::place(candidates, &request, default_selector) {
                Ok(target) => RecoveryAction::Reassign { domain: domain.clone(), target },
                Err(e) => RecoveryAction::Failed { domain: domain.clone(), reason: e.to_string() },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::node::{DaemonState, DomainState as NodeDomainState, NodeResources};

    fn candidate(name: &str) -> Node {
        let mut n = Node::new(name);
        n.daemon_state = DaemonState::Run;
        n.domain_state_observed = NodeDomainState::Ready;
        n.resources = NodeResources::default();
        n
    }

    fn domain(uuid: &str, state: DomainRunState, node_autostart: bool) -> Domain {
        Domain {
            uuid: uuid.to_string(),
            name: format!("vm-{uuid}"),
            xml: String::new(),
            state,
            node: "hvA".to_string(),
            last_node: None,
            failed_reason: None,
            node_limit: Vec::new(),
            node_selector: Selector::Mem,
            node_autostart,
            migration_method: crate::entity::domain::MigrationMethod::Live,
            migration_max_downtime_ms: 0,
            profile: String::new(),
            tags: Vec::new(),
            snapshots: Vec::new(),
        }
    }

    #[test]
    fn running_vm_without_autostart_is_left_stopped() {
        let domains = vec![domain("vm1", DomainRunState::Start, false)];
        let candidates = vec![candidate("hvB")];
        let actions = plan_recovery(&domains, &candidates, "hvA", Selector::Mem);
        assert!(matches!(actions[0], RecoveryAction::StopInPlace { .. }));
    }

    #[test]
    fn running_vm_with_autostart_is_reassigned_away_from_fenced_node() {
        let domains = vec![domain("vm1", DomainRunState::Start, true)];
        let candidates = vec![candidate("hvB"), candidate("hvC")];
        let actions = plan_recovery(&domains, &candidates, "hvA", Selector::Mem);
        match &actions[0] {
            RecoveryAction::Reassign { target, .. } => assert_ne!(target, "hvA"),
            _ => panic!("expected reassignment"),
        }
    }

    #[test]
    fn stopped_vm_is_not_touched_by_recovery() {
        let domains = vec![domain("vm1", DomainRunState::Stop, true)];
        let candidates = vec![candidate("hvB")];
        let actions = plan_recovery(&domains, &candidates, "hvA", Selector::Mem);
        assert!(actions.is_empty());
    }
}
