//! Watch dispatch: "Watch callbacks do three things and
//! nothing else: decode, compare-and-store, and call a small set of
//! registered hooks."
//!
//! This module only owns *delivery* — it re-arms ZooKeeper watches forever
//! and forwards raw events onto a bounded channel. The decode/compare-and-
//! store/hook-calling triad lives in `pvc-core::entity`, one level up,
//! where the byte payload actually has a type.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use zookeeper::{WatchedEvent, Watcher, ZkError, ZooKeeper};

use crate::client::CoordClient;
use crate::error::{from_zk, CoordError};

/// One event about a watched key's data.
#[derive(Debug, Clone)]
pub enum DataEvent {
    Changed(Vec<u8>),
    /// The key was deleted. On key deletion the watch
    /// closure returns a sentinel so the framework reaps the entity.
    Deleted,
}

/// One event about a watched key's children.
#[derive(Debug, Clone)]
pub enum ChildrenEvent {
    Changed(Vec<String>),
    Deleted,
}

/// Bridges ZooKeeper's one-shot `Watcher` callback (invoked on the client's
/// own IO thread) into a blocking-thread-friendly rendezvous so the
/// dispatcher loop below can re-arm after each fire.
struct OneshotWatcher(Mutex<Option<std::sync::mpsc::Sender<WatchedEvent>>>);

impl Watcher for OneshotWatcher {
    fn handle(&self, event: WatchedEvent) {
        if let Some(tx) = self.0.lock().expect("watcher mutex poisoned").take() {
            let _ = tx.send(event);
        }
    }
}

/// Handles for long-running watch loops, so callers can cancel them on
/// shutdown.
pub struct WatchDispatcher {
    client: Arc<CoordClient>,
}

impl WatchDispatcher {
    pub fn new(client: Arc<CoordClient>) -> Self {
        Self { client }
    }

    /// Watch a single key's data forever. Every observed version is
    /// delivered exactly once and in order,
    /// because we never re-arm until the previous fire has been both
    /// observed and forwarded.
    pub fn watch_data(&self, key: impl Into<String>, tx: mpsc::Sender<DataEvent>) -> JoinHandle<()> {
        let key = key.into();
        let zk = self.client.zk_handle();
        tokio::task::spawn_blocking(move || watch_data_loop(&zk, &key, tx))
    }

    /// Watch a key's children forever, same delivery guarantee as
    /// [`Self::watch_data`] but for the children list.
    pub fn watch_children(
        &self,
        key: impl Into<String>,
        tx: mpsc::Sender<ChildrenEvent>,
    ) -> JoinHandle<()> {
        let key = key.into();
        let zk = self.client.zk_handle();
        tokio::task::spawn_blocking(move || watch_children_loop(&zk, &key, tx))
    }
}

fn watch_data_loop(zk: &ZooKeeper, key: &str, tx: mpsc::Sender<DataEvent>) {
    loop {
        let (watch_tx, watch_rx) = std::sync::mpsc::channel();
        let watcher = OneshotWatcher(Mutex::new(Some(watch_tx)));

        match zk.get_data_w(key, watcher) {
            Ok((data, _stat)) => {
                trace!(%key, "data watch armed");
                if tx.blocking_send(DataEvent::Changed(data)).is_err() {
                    return; // receiver dropped, nothing left to dispatch to
                }
            }
            Err(ZkError::NoNode) => {
                let _ = tx.blocking_send(DataEvent::Deleted);
                // Keep watching in case the key reappears: re-arm via
                // `exists_w` is the idiomatic ZK move, but polling the
                // data watch on the same key works too since a create
                // fires the registered watcher.
            }
            Err(e) => {
                debug!(%key, error = ?e, "data watch setup failed");
                if matches!(from_zk(key, e), CoordError::SessionLost) {
                    return; // caller's reconciler loop re-derives on reconnect
                }
            }
        }

        // Block until the armed watch fires (or the ensemble session dies,
        // which the caller observes separately via CoordClient::connected).
        match watch_rx.recv_timeout(Duration::from_secs(3600)) {
            Ok(_event) => continue,
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn watch_children_loop(zk: &ZooKeeper, key: &str, tx: mpsc::Sender<ChildrenEvent>) {
    loop {
        let (watch_tx, watch_rx) = std::sync::mpsc::channel();
        let watcher = OneshotWatcher(Mutex::new(Some(watch_tx)));

        match zk.get_children_w(key, watcher) {
            Ok(children) => {
                if tx.blocking_send(ChildrenEvent::Changed(children)).is_err() {
                    return;
                }
            }
            Err(ZkError::NoNode) => {
                let _ = tx.blocking_send(ChildrenEvent::Deleted);
            }
            Err(e) => {
                if matches!(from_zk(key, e), CoordError::SessionLost) {
                    return;
                }
            }
        }

        match watch_rx.recv_timeout(Duration::from_secs(3600)) {
            Ok(_event) => continue,
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return,
        }
    }
}
