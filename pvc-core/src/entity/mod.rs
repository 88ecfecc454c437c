//! In-memory projections of the cluster's coordination-store entities,
//! plus the watch-hook framework: watch callbacks do three things and
//! nothing else — decode, compare-and-store, and call a small set of
//! registered hooks.
//!
//! [`WatchedEntity`] owns that triad generically over any entity type;
//! the per-kind modules below (`node`, `domain`, ...) only define the
//! shape, not the watch plumbing.

pub mod domain;
pub mod fault;
pub mod network;
pub mod node;
pub mod storage;
pub mod task;

pub use domain::Domain;
pub use fault::Fault;
pub use network::Network;
pub use node::Node;
pub use task::Task;

use std::sync::Arc;

use pvc_coord::DataEvent;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::warn;

/// What happened to a watched entity, handed to registered hooks.
#[derive(Debug, Clone)]
pub enum EntityEvent<T> {
    Updated(T),
    Deleted,
}

type Hook<T> = Box<dyn Fn(EntityEvent<T>) + Send + Sync>;

/// Holds the latest known value of one coordination-store key, kept
/// current by a background consumer of the key's [`DataEvent`] stream,
/// and the hooks registered against it. Hooks "may enqueue work but must
/// not block on the coordination client" — enforced here by
/// construction, since a hook only ever receives an already-decoded
/// value, never a handle back into the client.
pub struct WatchedEntity<T: Clone + Send + Sync + 'static> {
    current: RwLock<Option<T>>,
    hooks: Mutex<Vec<Hook<T>>>,
}

impl<T: Clone + Send + Sync + 'static> Default for WatchedEntity<T> {
    fn default() -> Self {
        Self {
            current: RwLock::new(None),
            hooks: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> WatchedEntity<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_hook(&self, hook: Hook<T>) {
        self.hooks.lock().await.push(hook);
    }

    pub async fn current(&self) -> Option<T> {
        self.current.read().await.clone()
    }

    /// Drive this entity's projection from a stream of raw data events.
    /// Per-key ordering is the dispatcher's job: this
    /// consumer only ever sees one event at a time and never re-arms
    /// anything itself.
    pub fn spawn_consumer(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<DataEvent>,
        decode: fn(&[u8]) -> serde_json::Result<T>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    DataEvent::Changed(bytes) => match decode(&bytes) {
                        Ok(value) => {
                            *self.current.write().await = Some(value.clone());
                            for hook in self.hooks.lock().await.iter() {
                                hook(EntityEvent::Updated(value.clone()));
                            }
                        }
                        Err(e) => warn!(error = %e, "failed to decode watched entity payload"),
                    },
                    DataEvent::Deleted => {
                        *self.current.write().await = None;
                        for hook in self.hooks.lock().await.iter() {
                            hook(EntityEvent::Deleted);
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
    struct Counter {
        n: u32,
    }

    #[tokio::test]
    async fn consumer_decodes_stores_and_calls_hooks() {
        let entity = Arc::new(WatchedEntity::<Counter>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        entity
            .register_hook(Box::new(move |_event: EntityEvent<Counter>| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }))
            .await;

        let (tx, rx) = mpsc::channel(4);
        let handle = entity.clone().spawn_consumer(rx, |bytes| serde_json::from_slice(bytes));

        tx.send(DataEvent::Changed(serde_json::to_vec(&Counter { n: 1 }).unwrap()))
            .await
            .unwrap();
        tx.send(DataEvent::Deleted).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(entity.current().await, None);
    }
}
