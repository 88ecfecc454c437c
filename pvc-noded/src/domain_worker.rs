//! [`DomainStateWorker`] implementation: the actual flush/unflush work a
//! node performs when the coordinator requests it leave or rejoin the
//! placement pool. Flush evacuates every locally-owned VM to
//! a selector-chosen peer via the Migration Controller; unflush restarts
//! autostart-tagged VMs and lets the node start accepting placement
//! again.

use std::sync::Arc;

use async_trait::async_trait;
use pvc_core::entity::domain::DomainRunState;
use pvc_core::error::{PvcError, PvcResult};
use pvc_core::migration::MigrationController;
use pvc_core::placement::{self, PlacementRequest, Selector};
use pvc_core::state_machine::DomainStateWorker;
use tracing::{info, warn};

use crate::view::NodeView;

pub struct NodeDomainWorker {
    node: String,
    view: Arc<NodeView>,
    migration: Arc<MigrationController>,
    default_selector: Selector,
}

impl NodeDomainWorker {
    pub fn new(node: impl Into<String>, view: Arc<NodeView>, migration: Arc<MigrationController>, default_selector: Selector) -> Self {
        Self { node: node.into(), view, migration, default_selector }
    }
}

#[async_trait]
impl DomainStateWorker for NodeDomainWorker {
    async fn flush(&self) -> PvcResult<()> {
        let owned = self.view.domains_owned_by(&self.node).await?;
        let nodes = self.view.list_nodes().await?;

        for domain in owned {
            if domain.state != DomainRunState::Start {
                continue;
            }

            let req = PlacementRequest {
                node_limit: &domain.node_limit,
                selector: domain.node_selector,
                forbidden_node: Some(self.node.as_str()),
            };
            let target = match placement::place(&nodes, &req, self.default_selector) {
                Ok(target) => target,
                Err(e) => {
                    warn!(vm = %domain.uuid, error = %e, "flush: no placement target, leaving in place");
                    return Err(e);
                }
            };

            info!(vm = %domain.uuid, target, "flush: evacuating");
            let moved = self.migration.mv(domain, &target, false).await?;
            self.view.put_domain(&moved).await?;
        }
        Ok(())
    }

    async fn unflush(&self) -> PvcResult<()> {
        let owned = self.view.domains_owned_by(&self.node).await?;
        for mut domain in owned {
            if domain.node_autostart && domain.state == DomainRunState::Stop {
                info!(vm = %domain.uuid, "unflush: autostarting");
                domain.state = DomainRunState::Start;
                domain.node_autostart = false;
                self.view.put_domain(&domain).await.map_err(|e| {
                    PvcError::Precondition(format!("failed to persist autostart for {}: {e}", domain.uuid))
                })?;
            }
        }
        Ok(())
    }
}
