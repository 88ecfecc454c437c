//! Drives one node's `coordinator_state` through the primary election
//! cycle: campaigns for the ZK sequential-ephemeral seat,
//! and on winning/losing it converges `coordinator_state` through the
//! table `pvc_core::state_machine::validate_coordinator_transition`
//! admits, bringing up/tearing down the Floating Services Manager and
//! the (primary-only) Fencing Monitor and fault aggregator alongside it.
//!
//! This also watches for an explicit handoff request written by
//! [`crate::registry::ClusterRegistry::request_coordinator_state`]:
//! `takeover` appearing on a *different* node than the one currently
//! held as primary here is the cue to resign our own
//! [`pvc_coord::ElectionGuard`] early, so the requested node's own
//! campaign can win the now-vacated seat.

use std::sync::Arc;
use std::time::Duration;

use pvc_coord::{CoordClient, Election};
use pvc_core::entity::node::CoordinatorState;
use pvc_core::fencing::FencingMonitor;
use pvc_core::floating::FloatingServicesManager;
use pvc_core::state_machine::validate_coordinator_transition;
use pvc_schema::{PathKind, Schema};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::registry::ClusterRegistry;

pub struct ElectionDriver {
    client: Arc<CoordClient>,
    schema: Arc<Schema>,
    registry: Arc<ClusterRegistry>,
    node: String,
    floating: Arc<FloatingServicesManager>,
    fencing: Arc<FencingMonitor>,
    fence_monitor_interval: Duration,
}

impl ElectionDriver {
    pub fn new(
        client: Arc<CoordClient>,
        schema: Arc<Schema>,
        registry: Arc<ClusterRegistry>,
        node: impl Into<String>,
        floating: Arc<FloatingServicesManager>,
        fencing: Arc<FencingMonitor>,
        fence_monitor_interval: Duration,
    ) -> Self {
        Self {
            client,
            schema,
            registry,
            node: node.into(),
            floating,
            fencing,
            fence_monitor_interval,
        }
    }

    /// Runs forever: campaign, hold primary until lost (involuntarily or
    /// via a handoff request), relinquish, campaign again.
    pub async fn run(&self, cancel: CancellationToken) {
        self.write_coordinator_state(CoordinatorState::Secondary).await;

        loop {
            if cancel.is_cancelled() {
                return;
            }

            let election = Election::new(self.client.clone(), self.schema.path(&PathKind::ElectionRoot));
            let mut guard = tokio::select! {
                _ = cancel.cancelled() => return,
                result = election.campaign(&self.node) => match result {
                    Ok(guard) => guard,
                    Err(e) => {
                        warn!(node = %self.node, error = %e, "election campaign failed, retrying");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                        continue;
                    }
                },
            };

            self.write_coordinator_state(CoordinatorState::Takeover).await;
            self.write_coordinator_state(CoordinatorState::Primary).await;
            self.registry.set_current_primary(Some(self.node.clone())).await;
            info!(node = %self.node, "now primary, bringing up floating services");

            if let Err(e) = self.floating.takeover().await {
                warn!(node = %self.node, error = %e, "floating services takeover failed");
            }

            let fence_cancel = CancellationToken::new();
            let fence_task = {
                let fencing = self.fencing.clone();
                let interval = self.fence_monitor_interval;
                let token = fence_cancel.clone();
                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(interval);
                    loop {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = ticker.tick() => {
                                if let Err(e) = fencing.tick(chrono::Utc::now()).await {
                                    warn!(error = %e, "fencing monitor tick failed");
                                }
                            }
                        }
                    }
                })
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    fence_cancel.cancel();
                    let _ = fence_task.await;
                    self.step_down(guard).await;
                    return;
                }
                _ = guard.wait_until_lost() => {
                    fence_cancel.cancel();
                    let _ = fence_task.await;
                    info!(node = %self.node, "lost primary seat involuntarily");
                    self.relinquish().await;
                }
            }
        }
    }

    async fn step_down(&self, guard: pvc_coord::ElectionGuard) {
        self.relinquish().await;
        if let Err(e) = guard.resign().await {
            warn!(node = %self.node, error = %e, "failed to resign election node on shutdown");
        }
    }

    async fn relinquish(&self) {
        self.write_coordinator_state(CoordinatorState::Relinquish).await;
        if let Err(e) = self.floating.relinquish().await {
            warn!(node = %self.node, error = %e, "floating services relinquish failed");
        }
        self.registry.set_current_primary(None).await;
        self.write_coordinator_state(CoordinatorState::Secondary).await;
    }

    async fn write_coordinator_state(&self, to: CoordinatorState) {
        let current = self
            .registry
            .get_node(&self.node)
            .await
            .map(|n| n.coordinator_state)
            .unwrap_or(CoordinatorState::None);
        if let Err(e) = validate_coordinator_transition(current, to) {
            warn!(node = %self.node, ?current, ?to, error = %e, "refusing illegal coordinator_state transition");
            return;
        }
        if let Err(e) = self.registry.write_coordinator_state(&self.node, to).await {
            warn!(node = %self.node, ?to, error = %e, "failed to write coordinator_state");
        }
    }
}
