//! Node State Machine: the `daemon_state`, `coordinator_state`,
//! and `domain_state` transition tables, plus the target/observed
//! reconciler loop that drives `domain_state`.
//!
//! Modeled on the teacher's single-reconciler-per-collection design
//! (`Reconciler` trait in `mvirt-node::reconciler`), generalized here from
//! "one reconciler per resource kind" to "one reconciler loop per node
//! state dimension": a state-change request writes the *target* state,
//! the owning node observes its own target via watch, performs the work,
//! then writes the *observed* state back.

use std::sync::Arc;

use async_trait::async_trait;
use pvc_coord::{CoordClient, DataEvent, WatchDispatcher};
use pvc_schema::{PathKind, Schema};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::entity::node::{CoordinatorState, DaemonState, DomainState};
use crate::error::{PvcError, PvcResult};

/// Validate a `daemon_state` transition.
pub fn validate_daemon_transition(from: DaemonState, to: DaemonState) -> PvcResult<()> {
    use DaemonState::*;
    let ok = matches!(
        (from, to),
        (Init, Run) | (Run, Stop) | (Stop, Run) | (Run, Dead) | (Dead, Fenced) | (Fenced, Run)
    );
    if ok {
        Ok(())
    } else {
        Err(PvcError::Precondition(format!(
            "illegal daemon_state transition {from:?} -> {to:?}"
        )))
    }
}

/// Validate a `coordinator_state` transition.
pub fn validate_coordinator_transition(from: CoordinatorState, to: CoordinatorState) -> PvcResult<()> {
    use CoordinatorState::*;
    // "primary -> none only via daemon_state -> stop|dead":
    // this table never admits a direct (Primary, None) edge. The caller
    // that drives both machines together must step through Relinquish
    // first; enforcing that sequencing here is what keeps the "at most
    // one primary" invariant from racing a daemon shutdown.
    let ok = matches!(
        (from, to),
        (None, Secondary)
            | (Secondary, None)
            | (Secondary, Takeover)
            | (Takeover, Primary)
            | (Primary, Relinquish)
            | (Relinquish, Secondary)
    );
    if ok {
        Ok(())
    } else {
        Err(PvcError::Precondition(format!(
            "illegal coordinator_state transition {from:?} -> {to:?}"
        )))
    }
}

/// Validate a `domain_state` transition.
pub fn validate_domain_transition(from: DomainState, to: DomainState) -> PvcResult<()> {
    use DomainState::*;
    let ok = matches!(
        (from, to),
        (Ready, Flush) | (Flush, Flushed) | (Flushed, Unflush) | (Unflush, Ready)
    );
    if ok {
        Ok(())
    } else {
        Err(PvcError::Precondition(format!(
            "illegal domain_state transition {from:?} -> {to:?}"
        )))
    }
}

/// The work a `flush`/`unflush` transition actually performs, supplied by
/// `pvc-noded` (which has the Migration Controller and Placement Engine
/// in scope). Kept as a trait so `pvc-core` states the contract without
/// depending on the executor-facing crates above it.
#[async_trait]
pub trait DomainStateWorker: Send + Sync {
    /// Evacuate every VM this node owns to selector-chosen peers
    ///. Must not return until every VM has actually left, or an
    /// error describing the first one that didn't.
    async fn flush(&self) -> PvcResult<()>;

    /// Restart VMs tagged `node_autostart=true` on this node and resume
    /// accepting placement.
    async fn unflush(&self) -> PvcResult<()>;
}

/// Drives one node's `domain_state` target/observed cycle. One instance
/// per node process.
pub struct DomainStateReconciler {
    client: Arc<CoordClient>,
    schema: Arc<Schema>,
    node: String,
    worker: Arc<dyn DomainStateWorker>,
}

impl DomainStateReconciler {
    pub fn new(
        client: Arc<CoordClient>,
        schema: Arc<Schema>,
        node: impl Into<String>,
        worker: Arc<dyn DomainStateWorker>,
    ) -> Self {
        Self {
            client,
            schema,
            node: node.into(),
            worker,
        }
    }

    /// Write a new target `domain_state` for this node. Validated against
    /// the last-observed state before writing.
    pub async fn request(&self, to: DomainState) -> PvcResult<()> {
        let observed = self.read_observed().await?;
        validate_domain_transition(observed, to)?;
        let key = self.schema.path(&PathKind::NodeDomainStateTarget(&self.node));
        self.client
            .write(vec![(key, serde_json::to_vec(&to)?)])
            .await?;
        Ok(())
    }

    async fn read_observed(&self) -> PvcResult<DomainState> {
        let key = self.schema.path(&PathKind::NodeDomainStateObserved(&self.node));
        match self.client.read(&key).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if matches!(e, pvc_coord::CoordError::NoNode(_)) => Ok(DomainState::Ready),
            Err(e) => Err(e.into()),
        }
    }

    /// Run forever: watch this node's own target, perform the matching
    /// work, write the observed half back. Exits when `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let key = self.schema.path(&PathKind::NodeDomainStateTarget(&self.node));
        let dispatcher = WatchDispatcher::new(self.client.clone());
        let (tx, mut rx) = mpsc::channel::<DataEvent>(16);
        let watch_handle = dispatcher.watch_data(key, tx);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    if let DataEvent::Changed(bytes) = event {
                        match serde_json::from_slice::<DomainState>(&bytes) {
                            Ok(target) => self.converge(target).await,
                            Err(e) => warn!(error = %e, "malformed domain_state target payload"),
                        }
                    }
                }
            }
        }

        watch_handle.abort();
    }

    async fn converge(&self, target: DomainState) {
        let result = match target {
            DomainState::Flush => self.worker.flush().await,
            DomainState::Unflush => self.worker.unflush().await,
            // Ready/Flushed are terminal states reached as the observed
            // side-effect of Unflush/Flush completing, not requested
            // directly as work.
            _ => return,
        };

        let observed = match result {
            Ok(()) => match target {
                DomainState::Flush => DomainState::Flushed,
                DomainState::Unflush => DomainState::Ready,
                other => other,
            },
            Err(e) => {
                warn!(node = %self.node, error = %e, "domain_state convergence failed");
                return;
            }
        };

        let key = self.schema.path(&PathKind::NodeDomainStateObserved(&self.node));
        match serde_json::to_vec(&observed) {
            Ok(bytes) => {
                if let Err(e) = self.client.write(vec![(key, bytes)]).await {
                    warn!(node = %self.node, error = %e, "failed to write observed domain_state");
                } else {
                    info!(node = %self.node, ?observed, "domain_state converged");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode observed domain_state"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daemon_transitions_follow_the_documented_table() {
        assert!(validate_daemon_transition(DaemonState::Init, DaemonState::Run).is_ok());
        assert!(validate_daemon_transition(DaemonState::Run, DaemonState::Dead).is_ok());
        assert!(validate_daemon_transition(DaemonState::Dead, DaemonState::Fenced).is_ok());
        assert!(validate_daemon_transition(DaemonState::Init, DaemonState::Dead).is_err());
        assert!(validate_daemon_transition(DaemonState::Fenced, DaemonState::Dead).is_err());
    }

    #[test]
    fn coordinator_transitions_gate_primary_through_takeover() {
        use CoordinatorState::*;
        assert!(validate_coordinator_transition(Secondary, Takeover).is_ok());
        assert!(validate_coordinator_transition(Takeover, Primary).is_ok());
        assert!(validate_coordinator_transition(Secondary, Primary).is_err());
        assert!(validate_coordinator_transition(Primary, None).is_err());
    }

    #[test]
    fn domain_transitions_are_a_simple_cycle() {
        use DomainState::*;
        assert!(validate_domain_transition(Ready, Flush).is_ok());
        assert!(validate_domain_transition(Flush, Flushed).is_ok());
        assert!(validate_domain_transition(Flushed, Unflush).is_ok());
        assert!(validate_domain_transition(Unflush, Ready).is_ok());
        assert!(validate_domain_transition(Ready, Flushed).is_err());
    }
}
