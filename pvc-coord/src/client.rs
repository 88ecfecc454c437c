//! Typed accessor over the coordination service.
//!
//! Mirrors the teacher's habit (`mvirt-node`'s gRPC clients) of keeping one
//! long-lived connection and wrapping every blocking call in
//! `spawn_blocking`, generalized here from a gRPC channel to a ZooKeeper
//! session. The `connected` wrapper replaces the Python original's
//! decorator-based session management: every public
//! call funnels through it, which makes sure a session is live before the
//! call proceeds and classifies any failure mid-call as
//! [`CoordError::SessionLost`] rather than letting callers retry blindly.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};
use zookeeper::{Acl, CreateMode, WatchedEvent, Watcher, ZkError, ZkState, ZooKeeper};

use crate::error::{from_zk, CoordError, CoordResult};

/// Running counters surfaced to the health aggregator rather than a full metrics crate, since
/// Prometheus scraping itself is out of core scope.
#[derive(Debug, Default)]
pub struct CoordMetrics {
    pub reads: AtomicU64,
    pub writes: AtomicU64,
    pub watch_fires: AtomicU64,
    pub reconnects: AtomicU64,
}

struct SessionWatcher {
    connected_tx: watch::Sender<bool>,
    reconnects: Arc<AtomicU64>,
}

impl Watcher for SessionWatcher {
    fn handle(&self, event: WatchedEvent) {
        match event.keeper_state {
            ZkState::SyncConnected => {
                let _ = self.connected_tx.send(true);
            }
            ZkState::Closed | ZkState::AuthFailed | ZkState::Expired => {
                self.reconnects.fetch_add(1, Ordering::Relaxed);
                let _ = self.connected_tx.send(false);
            }
            _ => {
                let _ = self.connected_tx.send(false);
            }
        }
    }
}

/// Typed handle to a live coordination session, handed to the closure
/// passed to [`CoordClient::connected`]. Exists mainly so that code inside
/// the closure is visibly operating "inside" an established session rather
/// than holding a bare `&CoordClient`.
pub struct Handle<'a> {
    pub(crate) client: &'a CoordClient,
}

/// The Coord Client. One instance per process, shared via `Arc`.
pub struct CoordClient {
    zk: Arc<ZooKeeper>,
    connected_rx: watch::Receiver<bool>,
    pub metrics: Arc<CoordMetrics>,
    /// Same root the process's `Schema` was built with, kept here only so
    /// `write()` can derive the multi-write lock path without every caller
    /// having to pass a `Schema` handle down into a generic primitive.
    root: String,
}

impl CoordClient {
    /// Connect to the coordination ensemble. `session_timeout` bounds how
    /// long the underlying ZK session is allowed to go unacknowledged
    /// before the ensemble expires it. `root` is the same coordination
    /// root the caller's `Schema` is built with.
    pub async fn connect(
        connect_string: &str,
        session_timeout: Duration,
        root: &str,
    ) -> CoordResult<Self> {
        let (connected_tx, mut connected_rx) = watch::channel(false);
        let reconnects = Arc::new(AtomicU64::new(0));
        let watcher = SessionWatcher {
            connected_tx,
            reconnects: reconnects.clone(),
        };

        let connect_string = connect_string.to_string();
        let zk = tokio::task::spawn_blocking(move || {
            ZooKeeper::connect(&connect_string, session_timeout, watcher)
        })
        .await
        .map_err(|e| CoordError::Other(format!("connect task panicked: {e}")))?
        .map_err(|e| from_zk(&connect_string, e))?;

        // Wait briefly for the first SyncConnected event.
        let _ = tokio::time::timeout(Duration::from_secs(10), connected_rx.changed()).await;

        Ok(Self {
            zk: Arc::new(zk),
            connected_rx,
            metrics: Arc::new(CoordMetrics {
                reconnects: AtomicU64::new(0),
                ..Default::default()
            }),
            root: root.to_string(),
        })
    }

    fn is_connected(&self) -> bool {
        *self.connected_rx.borrow()
    }

    /// The scoped-acquisition wrapper: ensures
    /// a session is live, runs `f`, and classifies any error surfaced
    /// through it. `f` receives a [`Handle`] rather than `&self` so call
    /// sites read as "do this under an active session".
    pub async fn connected<F, Fut, T>(&self, f: F) -> CoordResult<T>
    where
        F: FnOnce(Handle<'_>) -> Fut,
        Fut: Future<Output = CoordResult<T>>,
    {
        if !self.is_connected() {
            let mut rx = self.connected_rx.clone();
            tokio::time::timeout(Duration::from_secs(5), async {
                while !*rx.borrow() {
                    if rx.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await
            .map_err(|_| CoordError::SessionTimeout)?;
        }

        let handle = Handle { client: self };
        match f(handle).await {
            Err(e) if e.is_transient() => {
                warn!(error = %e, "coordination call failed transiently");
                Err(e)
            }
            other => other,
        }
    }

    fn zk(&self) -> Arc<ZooKeeper> {
        self.zk.clone()
    }

    /// Shared handle to the underlying client, for `pvc-coord` submodules
    /// (watch dispatch, locks, election) that need direct access to ZK
    /// primitives the high-level `read`/`write`/`delete` surface doesn't
    /// expose (sequential/ephemeral creates, explicit watchers).
    pub(crate) fn zk_handle(&self) -> Arc<ZooKeeper> {
        self.zk.clone()
    }

    /// Read the raw bytes at `key`.
    pub async fn read(&self, key: &str) -> CoordResult<Vec<u8>> {
        self.metrics.reads.fetch_add(1, Ordering::Relaxed);
        let zk = self.zk();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            zk.get_data(&key, false)
                .map(|(data, _stat)| data)
                .map_err(|e| from_zk(&key, e))
        })
        .await
        .map_err(|e| CoordError::Other(format!("read task panicked: {e}")))?
    }

    /// Multi-write: applies `pairs` in order. The underlying `zookeeper`
    /// crate exposes no multi-op transaction primitive, so this is **not**
    /// wire-level atomic — if the batch has more than one pair and a later
    /// key's write fails, earlier keys in the same call are already
    /// visible to watchers. What this method does provide: every batch of
    /// two or more pairs is serialized behind the cluster's
    /// [`pvc_schema::PathKind::MultiWriteLock`] write-lock, so two
    /// `write()` calls from different callers can never interleave their
    /// individual key writes into one another. Callers that need a set of
    /// fields to become observable together, with no partial state ever
    /// visible, must encode them into a single key's value instead of
    /// relying on cross-key atomicity here.
    pub async fn write(self: &Arc<Self>, pairs: Vec<(String, Vec<u8>)>) -> CoordResult<()> {
        self.metrics
            .writes
            .fetch_add(pairs.len() as u64, Ordering::Relaxed);
        if pairs.is_empty() {
            return Ok(());
        }
        let _guard = if pairs.len() > 1 {
            let lock_path = self.multi_write_lock_path();
            Some(crate::lock::write_lock(self, &lock_path).await?)
        } else {
            None
        };
        let zk = self.zk();
        tokio::task::spawn_blocking(move || -> CoordResult<()> {
            for (key, value) in &pairs {
                match zk.set_data(key, value.clone(), None) {
                    Ok(_) => {}
                    Err(ZkError::NoNode) => {
                        zk.create(
                            key,
                            value.clone(),
                            Acl::open_unsafe().clone(),
                            CreateMode::Persistent,
                        )
                        .map_err(|e| from_zk(key, e))?;
                    }
                    Err(e) => return Err(from_zk(key, e)),
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| CoordError::Other(format!("write task panicked: {e}")))?
    }

    /// Path of the shared lock `write()` takes around multi-pair batches,
    /// under the same root the process's `Schema` was built with.
    fn multi_write_lock_path(&self) -> String {
        pvc_schema::Schema::new(self.root.clone()).path(&pvc_schema::PathKind::MultiWriteLock)
    }

    /// Delete `key`. With `recursive`, deletes the whole subtree
    /// depth-first (ZK requires children to be gone before a node).
    pub async fn delete(&self, key: &str, recursive: bool) -> CoordResult<()> {
        let zk = self.zk();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> CoordResult<()> {
            if recursive {
                delete_recursive(&zk, &key)?;
            } else {
                match zk.delete(&key, None) {
                    Ok(()) | Err(ZkError::NoNode) => {}
                    Err(e) => return Err(from_zk(&key, e)),
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| CoordError::Other(format!("delete task panicked: {e}")))?
    }

    /// List the names of `key`'s immediate children.
    pub async fn children(&self, key: &str) -> CoordResult<Vec<String>> {
        let zk = self.zk();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            match zk.get_children(&key, false) {
                Ok(children) => Ok(children),
                Err(ZkError::NoNode) => Ok(Vec::new()),
                Err(e) => Err(from_zk(&key, e)),
            }
        })
        .await
        .map_err(|e| CoordError::Other(format!("children task panicked: {e}")))?
    }

    pub async fn exists(&self, key: &str) -> CoordResult<bool> {
        let zk = self.zk();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            zk.exists(&key, false)
                .map(|s| s.is_some())
                .map_err(|e| from_zk(&key, e))
        })
        .await
        .map_err(|e| CoordError::Other(format!("exists task panicked: {e}")))?
    }

    /// Ensure every persistent ancestor of `key` exists, creating empty
    /// placeholder nodes as needed. ZK requires a node's parent to exist
    /// before it can be created; callers that build paths dynamically
    /// (locks, per-node subtrees) call this before their first write.
    pub async fn create_parents(&self, key: &str) -> CoordResult<()> {
        let zk = self.zk();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> CoordResult<()> {
            let mut prefix = String::new();
            for segment in key.split('/').filter(|s| !s.is_empty()) {
                prefix.push('/');
                prefix.push_str(segment);
                match zk.create(
                    &prefix,
                    Vec::new(),
                    Acl::open_unsafe().clone(),
                    CreateMode::Persistent,
                ) {
                    Ok(_) | Err(ZkError::NodeExists) => {}
                    Err(e) => return Err(from_zk(&prefix, e)),
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| CoordError::Other(format!("create_parents task panicked: {e}")))?
    }

    /// Create `key` with `value`, failing if it already exists. Used by
    /// callers (node registration, domain define) that must distinguish
    /// "created" from "already there".
    pub async fn create(&self, key: &str, value: Vec<u8>, ephemeral: bool) -> CoordResult<()> {
        let zk = self.zk();
        let key = key.to_string();
        let mode = if ephemeral {
            CreateMode::Ephemeral
        } else {
            CreateMode::Persistent
        };
        tokio::task::spawn_blocking(move || {
            zk.create(&key, value, Acl::open_unsafe().clone(), mode)
                .map(|_| ())
                .map_err(|e| from_zk(&key, e))
        })
        .await
        .map_err(|e| CoordError::Other(format!("create task panicked: {e}")))?
    }
}

/// Recursively delete `path` and everything under it, children first.
fn delete_recursive(zk: &ZooKeeper, path: &str) -> CoordResult<()> {
    let children = match zk.get_children(path, false) {
        Ok(c) => c,
        Err(ZkError::NoNode) => return Ok(()),
        Err(e) => return Err(from_zk(path, e)),
    };
    for child in children {
        let child_path = format!("{}/{}", path.trim_end_matches('/'), child);
        delete_recursive(zk, &child_path)?;
    }
    match zk.delete(path, None) {
        Ok(()) | Err(ZkError::NoNode) => Ok(()),
        Err(e) => Err(from_zk(path, e)),
    }
}

impl std::fmt::Debug for CoordClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordClient")
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[allow(dead_code)]
fn _log_watch_fire(metrics: &CoordMetrics) {
    metrics.watch_fires.fetch_add(1, Ordering::Relaxed);
    debug!("watch fired");
}
