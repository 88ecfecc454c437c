//! Coord Client: the cluster's sole typed gateway onto the ZooKeeper
//! ensemble. Every other crate in the workspace reaches
//! coordination state through this crate — nobody else touches
//! `zookeeper::ZooKeeper` directly, and nobody builds a path by hand
//! (that's `pvc_schema::Schema::path`'s job).

mod client;
mod election;
mod error;
mod lock;
mod watch;

pub use client::{CoordClient, CoordMetrics, Handle};
pub use election::{Election, ElectionGuard};
pub use error::{CoordError, CoordResult};
pub use lock::{read_lock, write_lock, LockGuard};
pub use watch::{ChildrenEvent, DataEvent, WatchDispatcher};
