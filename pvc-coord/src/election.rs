//! Primary coordinator leader election, a ZK sequential-
//! ephemeral recipe under `base.config.primary_node`
//! ([`pvc_schema::PathKind::ElectionRoot`]).
//!
//! The natural ordering ZK assigns sequence nodes provides the tie-break;
//! the lowest surviving sequence number is always the
//! leader. Session loss removes a candidate's node automatically, which is
//! how a crashed primary's leadership is reclaimed without anyone having to
//! detect the crash explicitly.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};
use zookeeper::{Acl, CreateMode, WatchedEvent, Watcher, ZkError};

use crate::client::CoordClient;
use crate::error::{from_zk, CoordError, CoordResult};

const CANDIDATE_PREFIX: &str = "candidate-";

pub struct Election {
    client: Arc<CoordClient>,
    path: String,
}

impl Election {
    pub fn new(client: Arc<CoordClient>, path: impl Into<String>) -> Self {
        Self {
            client,
            path: path.into(),
        }
    }

    /// Enter the race. Blocks until `identity` becomes leader. The
    /// returned [`ElectionGuard`] represents held leadership: it resolves
    /// [`ElectionGuard::wait_until_lost`] if session death or a peer's
    /// fencing removes this candidate, and [`ElectionGuard::resign`]
    /// performs the voluntary step-down.
    pub async fn campaign(&self, identity: &str) -> CoordResult<ElectionGuard> {
        self.client.create_parents(&self.path).await?;

        let zk = self.client.zk_handle();
        let path = self.path.clone();
        let identity_bytes = identity.as_bytes().to_vec();
        let own_node = tokio::task::spawn_blocking({
            let zk = zk.clone();
            let path = path.clone();
            move || {
                zk.create(
                    &format!("{path}/{CANDIDATE_PREFIX}"),
                    identity_bytes,
                    Acl::open_unsafe().clone(),
                    CreateMode::EphemeralSequential,
                )
                .map_err(|e| from_zk(&path, e))
            }
        })
        .await
        .map_err(|e| CoordError::Other(format!("election create task panicked: {e}")))??;

        let own_seq = sequence_of(&own_node);

        loop {
            let children = tokio::task::spawn_blocking({
                let zk = zk.clone();
                let path = path.clone();
                move || zk.get_children(&path, false).map_err(|e| from_zk(&path, e))
            })
            .await
            .map_err(|e| CoordError::Other(format!("election children task panicked: {e}")))??;

            let lower = children
                .iter()
                .filter(|c| sequence_of(c) < own_seq)
                .min_by_key(|c| sequence_of(c));

            match lower {
                None => {
                    info!(identity, node = %own_node, "elected primary coordinator");
                    break;
                }
                Some(lower) => {
                    let lower_path = format!("{path}/{lower}");
                    wait_for_deletion(&zk, &lower_path).await?;
                }
            }
        }

        // Watch our own node so we notice if our session is fenced out or
        // a peer performs an administrative removal; this is how the
        // node's NodeStateMachine learns to write `relinquish`.
        let (lost_tx, lost_rx) = watch::channel(false);
        let watch_path = own_node.clone();
        let watch_zk = zk.clone();
        tokio::task::spawn_blocking(move || watch_own_node(&watch_zk, &watch_path, lost_tx));

        Ok(ElectionGuard {
            client: self.client.clone(),
            node_path: own_node,
            lost_rx,
            resigned: false,
        })
    }
}

pub struct ElectionGuard {
    client: Arc<CoordClient>,
    node_path: String,
    lost_rx: watch::Receiver<bool>,
    resigned: bool,
}

impl ElectionGuard {
    /// Resolves when leadership has been lost involuntarily (session
    /// death). Callers drive the `primary -> relinquish -> secondary`
    /// writes from this.
    pub async fn wait_until_lost(&mut self) {
        while !*self.lost_rx.borrow() {
            if self.lost_rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Voluntarily step down.
    pub async fn resign(mut self) -> CoordResult<()> {
        self.resigned = true;
        self.client.delete(&self.node_path, false).await
    }
}

impl Drop for ElectionGuard {
    fn drop(&mut self) {
        if self.resigned {
            return;
        }
        let client = self.client.clone();
        let path = self.node_path.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = client.delete(&path, false).await {
                    warn!(path = %path, error = %e, "failed to resign election node on drop");
                }
            });
        }
    }
}

fn sequence_of(child: &str) -> i64 {
    child
        .rsplit(|c: char| !c.is_ascii_digit())
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(i64::MAX)
}

struct DeletionWatcher(std::sync::mpsc::Sender<WatchedEvent>);

impl Watcher for DeletionWatcher {
    fn handle(&self, event: WatchedEvent) {
        let _ = self.0.send(event);
    }
}

async fn wait_for_deletion(zk: &Arc<zookeeper::ZooKeeper>, path: &str) -> CoordResult<()> {
    let zk = zk.clone();
    let path = path.to_string();
    tokio::task::spawn_blocking(move || -> CoordResult<()> {
        let (tx, rx) = std::sync::mpsc::channel();
        match zk.exists_w(&path, DeletionWatcher(tx)) {
            Ok(None) => return Ok(()),
            Ok(Some(_)) => {}
            Err(ZkError::NoNode) => return Ok(()),
            Err(e) => return Err(from_zk(&path, e)),
        }
        let _ = rx.recv_timeout(Duration::from_secs(300));
        Ok(())
    })
    .await
    .map_err(|e| CoordError::Other(format!("election wait task panicked: {e}")))?
}

/// Background loop: watch our own election node forever, flip `lost_tx` if
/// it ever disappears before we resign it ourselves.
fn watch_own_node(
    zk: &std::sync::Arc<zookeeper::ZooKeeper>,
    path: &str,
    lost_tx: watch::Sender<bool>,
) {
    loop {
        let (tx, rx) = std::sync::mpsc::channel();
        match zk.exists_w(path, DeletionWatcher(tx)) {
            Ok(Some(_)) => {}
            Ok(None) | Err(ZkError::NoNode) => {
                let _ = lost_tx.send(true);
                return;
            }
            Err(_) => {
                let _ = lost_tx.send(true);
                return;
            }
        }
        match rx.recv_timeout(Duration::from_secs(3600)) {
            Ok(_) => continue,
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::sequence_of;

    #[test]
    fn lowest_sequence_among_candidates_wins() {
        let candidates = ["candidate-0000000003", "candidate-0000000001", "candidate-0000000002"];
        let winner = candidates.iter().min_by_key(|c| sequence_of(c)).unwrap();
        assert_eq!(*winner, "candidate-0000000001");
    }

    #[test]
    fn sequence_of_candidate_prefix() {
        assert_eq!(sequence_of("candidate-0000000123"), 123);
    }
}
