//! Distributed read/write locks built on ZooKeeper's classic
//! sequential-ephemeral recipe: each waiter creates an ephemeral sequential
//! child under the lock's path; a write lock holds it when its node has the
//! lowest sequence number among all children; a read lock holds it when no
//! lower-numbered *write* waiter exists. Releasing is just deleting the
//! node (or letting the session die, which ZK does for us).

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use zookeeper::{Acl, CreateMode, WatchedEvent, Watcher, ZkError, ZooKeeper};

use crate::client::CoordClient;
use crate::error::{from_zk, CoordError, CoordResult};

const READ_PREFIX: &str = "read-";
const WRITE_PREFIX: &str = "write-";

/// Held lock; releases on drop (best-effort — see [`LockGuard::release`]
/// for the awaitable, checked version).
pub struct LockGuard {
    client: Arc<CoordClient>,
    node_path: String,
    released: bool,
}

impl LockGuard {
    /// Explicitly release the lock and await confirmation. Prefer this
    /// over relying on `Drop` when the caller can await, since `Drop`
    /// can only fire a best-effort async delete.
    pub async fn release(mut self) -> CoordResult<()> {
        self.released = true;
        self.client.delete(&self.node_path, false).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let client = self.client.clone();
        let path = self.node_path.clone();
        // Best-effort: if the process is shutting down and there's no
        // runtime left to spawn onto, the ephemeral node still disappears
        // when the ZK session itself closes.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = client.delete(&path, false).await {
                    warn!(path = %path, error = %e, "failed to release lock on drop");
                }
            });
        }
    }
}

struct ChildDeletedWatcher(std::sync::mpsc::Sender<WatchedEvent>);

impl Watcher for ChildDeletedWatcher {
    fn handle(&self, event: WatchedEvent) {
        let _ = self.0.send(event);
    }
}

/// Acquire a lock at `base_path`. `prefix` distinguishes read from write
/// waiters under the same parent.
async fn acquire(
    client: &Arc<CoordClient>,
    base_path: &str,
    prefix: &'static str,
    is_write: bool,
) -> CoordResult<LockGuard> {
    client.create_parents(base_path).await?;

    let zk = client.zk_handle();
    let base = base_path.to_string();
    let own_node = tokio::task::spawn_blocking({
        let zk = zk.clone();
        let base = base.clone();
        move || {
            zk.create(
                &format!("{base}/{prefix}"),
                Vec::new(),
                Acl::open_unsafe().clone(),
                CreateMode::EphemeralSequential,
            )
            .map_err(|e| from_zk(&base, e))
        }
    })
    .await
    .map_err(|e| CoordError::Other(format!("lock create task panicked: {e}")))??;

    let own_seq = sequence_of(&own_node);

    loop {
        let children = tokio::task::spawn_blocking({
            let zk = zk.clone();
            let base = base.clone();
            move || zk.get_children(&base, false).map_err(|e| from_zk(&base, e))
        })
        .await
        .map_err(|e| CoordError::Other(format!("children task panicked: {e}")))??;

        let blocker = children
            .iter()
            .filter(|c| {
                let seq = sequence_of(c);
                if is_write {
                    seq < own_seq
                } else {
                    c.starts_with(WRITE_PREFIX) && seq < own_seq
                }
            })
            .min_by_key(|c| sequence_of(c));

        match blocker {
            None => {
                debug!(path = %own_node, write = is_write, "lock acquired");
                return Ok(LockGuard {
                    client: client.clone(),
                    node_path: own_node,
                    released: false,
                });
            }
            Some(blocker) => {
                let blocker_path = format!("{base}/{blocker}");
                wait_for_deletion(&zk, &blocker_path).await?;
            }
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

async fn wait_for_deletion(zk: &Arc<ZooKeeper>, path: &str) -> CoordResult<()> {
    let zk = zk.clone();
    let path = path.to_string();
    tokio::task::spawn_blocking(move || -> CoordResult<()> {
        let (tx, rx) = std::sync::mpsc::channel();
        let watcher = ChildDeletedWatcher(tx);
        match zk.exists_w(&path, watcher) {
            Ok(None) => return Ok(()), // already gone
            Ok(Some(_)) => {}
            Err(ZkError::NoNode) => return Ok(()),
            Err(e) => return Err(from_zk(&path, e)),
        }
        match rx.recv_timeout(Duration::from_secs(300)) {
            Ok(_) | Err(std::sync::mpsc::RecvTimeoutError::Timeout) => Ok(()),
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => Ok(()),
        }
    })
    .await
    .map_err(|e| CoordError::Other(format!("wait task panicked: {e}")))?
}

/// Acquire a read (shared) lock at `path`. Blocks only behind writers.
pub async fn read_lock(client: &Arc<CoordClient>, path: &str) -> CoordResult<LockGuard> {
    acquire(client, path, READ_PREFIX, false).await
}

/// Acquire a write (exclusive) lock at `path`. Blocks behind readers and
/// writers alike.
pub async fn write_lock(client: &Arc<CoordClient>, path: &str) -> CoordResult<LockGuard> {
    acquire(client, path, WRITE_PREFIX, true).await
}

#[cfg(test)]
mod tests {
    use super::sequence_of;

    #[test]
    fn sequence_of_parses_trailing_digits() {
        assert_eq!(sequence_of("read-0000000042"), 42);
        assert_eq!(sequence_of("write-0000000007"), 7);
    }

    #[test]
    fn sequence_of_orders_by_value_not_string() {
        // "9" < "10" lexicographically but must not sort before it numerically.
        assert!(sequence_of("write-0000000009") < sequence_of("write-0000000010"));
    }

    #[test]
    fn sequence_of_unparseable_suffix_sorts_last() {
        assert_eq!(sequence_of("garbage"), i64::MAX);
    }
}
