//! Migration Controller: executes live/shutdown/none
//! migration of a single VM with recordable "migrated-from" lineage and
//! unmigrate, serialized by the domain's write-lock.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pvc_coord::CoordClient;
use pvc_schema::{PathKind, Schema};
use tracing::info;

use crate::entity::domain::{Domain, DomainRunState, MigrationMethod};
use crate::error::{PvcError, PvcResult};

/// Libvirt operations the controller needs, external collaborator.
#[async_trait]
pub trait LibvirtDriver: Send + Sync {
    async fn live_migrate(&self, domain: &Domain, target: &str, max_downtime_ms: u64) -> PvcResult<()>;
    async fn guest_shutdown(&self, domain: &Domain) -> PvcResult<()>;
    async fn wait_stopped(&self, domain: &Domain, timeout: Duration) -> PvcResult<bool>;
    async fn redefine_on(&self, domain: &Domain, target: &str) -> PvcResult<()>;
    async fn start(&self, domain: &Domain) -> PvcResult<()>;
}

/// Ceph RBD exclusive-lock operations. Belongs
/// to the last running hypervisor.
#[async_trait]
pub trait RbdLockManager: Send + Sync {
    async fn claim(&self, domain: &Domain, node: &str) -> PvcResult<()>;
    async fn release(&self, domain: &Domain, node: &str) -> PvcResult<()>;
    async fn force_release_stale(&self, domain: &Domain, node: &str) -> PvcResult<()>;
}

pub struct MigrationController {
    client: Arc<CoordClient>,
    schema: Arc<Schema>,
    libvirt: Arc<dyn LibvirtDriver>,
    rbd: Arc<dyn RbdLockManager>,
    shutdown_timeout: Duration,
}

impl MigrationController {
    pub fn new(
        client: Arc<CoordClient>,
        schema: Arc<Schema>,
        libvirt: Arc<dyn LibvirtDriver>,
        rbd: Arc<dyn RbdLockManager>,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            client,
            schema,
            libvirt,
            rbd,
            shutdown_timeout,
        }
    }

    /// Migrate `domain` to `target`, per its `migration_method`, holding
    /// the domain write-lock for the whole operation.
    /// Sets `last_node=<source>` (lineage).
    pub async fn migrate(
        &self,
        mut domain: Domain,
        target: &str,
        force: bool,
        force_live: bool,
    ) -> PvcResult<Domain> {
        if domain.has_migration_lineage() && !force {
            return Err(PvcError::Precondition(
                "domain already has an open migration lineage; pass force to re-pin".to_string(),
            ));
        }

        let source = domain.node.clone();
        self.transfer(&domain, target, force_live).await?;
        domain.last_node = Some(source);
        domain.node = target.to_string();
        domain.state = DomainRunState::Start;
        info!(vm = %domain.uuid, target, "migration complete");
        Ok(domain)
    }

    /// Relocate `domain` to `target` without establishing migration
    /// lineage — clears `last_node` rather than setting it.
    pub async fn mv(&self, mut domain: Domain, target: &str, force_live: bool) -> PvcResult<Domain> {
        self.transfer(&domain, target, force_live).await?;
        domain.last_node = None;
        domain.node = target.to_string();
        domain.state = DomainRunState::Start;
        info!(vm = %domain.uuid, target, "move complete");
        Ok(domain)
    }

    async fn transfer(&self, domain: &Domain, target: &str, force_live: bool) -> PvcResult<()> {
        let lock_path = self.schema.path(&PathKind::DomainLock(&domain.uuid));
        let guard = pvc_coord::write_lock(&self.client, &lock_path).await?;

        let result = match domain.migration_method {
            MigrationMethod::Live => self.do_live(domain, target, force_live).await,
            MigrationMethod::Shutdown => self.do_shutdown(domain, target).await,
            MigrationMethod::None => Err(PvcError::Precondition(
                "migration_method=none refuses migration unless source is already stopped".to_string(),
            )),
        };

        guard.release().await?;
        result
    }

    async fn do_live(&self, domain: &Domain, target: &str, force_live: bool) -> PvcResult<()> {
        match self
            .libvirt
            .live_migrate(domain, target, domain.migration_max_downtime_ms)
            .await
        {
            Ok(()) => {
                self.rbd.release(domain, &domain.node).await?;
                self.rbd.claim(domain, target).await?;
                Ok(())
            }
            Err(e) if force_live => Err(e),
            Err(_) => self.do_shutdown(domain, target).await,
        }
    }

    async fn do_shutdown(&self, domain: &Domain, target: &str) -> PvcResult<()> {
        self.libvirt.guest_shutdown(domain).await?;
        let stopped = self.libvirt.wait_stopped(domain, self.shutdown_timeout).await?;
        if !stopped {
            return Err(PvcError::ExecutorFailure {
                executor: "libvirt",
                detail: "guest did not stop within shutdown_timeout".to_string(),
            });
        }
        self.rbd.release(domain, &domain.node).await?;
        self.libvirt.redefine_on(domain, target).await?;
        self.rbd.claim(domain, target).await?;
        self.libvirt.start(domain).await?;
        Ok(())
    }

    /// `none`: refuse unless source is already stopped.
    pub async fn move_none(&self, domain: Domain) -> PvcResult<()> {
        if domain.state != DomainRunState::Stop {
            return Err(PvcError::Precondition(
                "migration_method=none requires the domain to already be stopped".to_string(),
            ));
        }
        Ok(())
    }

    /// Return `domain` to its `last_node`.
    pub async fn unmigrate(&self, mut domain: Domain) -> PvcResult<Domain> {
        let Some(last_node) = domain.last_node.clone() else {
            return Err(PvcError::Precondition(
                "unmigrate requires an open migration lineage (last_node set)".to_string(),
            ));
        };

        self.transfer(&domain, &last_node, false).await?;

        domain.node = last_node;
        domain.last_node = None;
        domain.state = DomainRunState::Start;
        Ok(domain)
    }

    /// `vm.flush_locks` recovery task: accepted only when
    /// the VM is stopped/disabled/mirroring; force-releases stale RBD
    /// locks on the domain's owning node.
    pub async fn flush_locks(&self, domain: &Domain) -> PvcResult<()> {
        let acceptable = matches!(
            domain.state,
            DomainRunState::Stop | DomainRunState::Disable | DomainRunState::Mirror
        );
        if !acceptable {
            return Err(PvcError::Precondition(
                "VM must be stopped to flush locks".to_string(),
            ));
        }
        self.rbd.force_release_stale(domain, &domain.node).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_domain(state: DomainRunState, last_node: Option<&str>) -> Domain {
        Domain {
            uuid: "vm-1".to_string(),
            name: "vm1".to_string(),
            xml: String::new(),
            state,
            node: "hvA".to_string(),
            last_node: last_node.map(str::to_string),
            failed_reason: None,
            node_limit: Vec::new(),
            node_selector: crate::placement::Selector::Mem,
            node_autostart: false,
            migration_method: MigrationMethod::Live,
            migration_max_downtime_ms: 300,
            profile: String::new(),
            tags: Vec::new(),
            snapshots: Vec::new(),
        }
    }

    #[test]
    fn has_migration_lineage_reflects_last_node() {
        assert!(!sample_domain(DomainRunState::Start, None).has_migration_lineage());
        assert!(sample_domain(DomainRunState::Start, Some("hvB")).has_migration_lineage());
    }
}
