//! Coord Client error surface.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordError {
    /// The requested key does not exist.
    #[error("no such key: {0}")]
    NoNode(String),

    /// A create raced an existing key (or a delete raced a version bump).
    #[error("key already exists: {0}")]
    NodeExists(String),

    /// The ZK session died mid-call. Callers never retry inside the
    /// client — they re-enter once the session is
    /// reestablished, which the reconciler loops do naturally on their
    /// next tick.
    #[error("coordination session lost")]
    SessionLost,

    /// The session handshake itself timed out establishing a connection.
    #[error("coordination session timed out connecting")]
    SessionTimeout,

    /// A lock or election recipe was released or abandoned from under the
    /// caller (e.g. the ephemeral lock node vanished unexpectedly).
    #[error("lock lost: {0}")]
    LockLost(String),

    /// Anything else the underlying client returned.
    #[error("coordination error: {0}")]
    Other(String),
}

impl CoordError {
    /// True for errors where the correct response is "reconnect and
    /// re-derive state from watches", never "retry the same call".
    pub fn is_transient(&self) -> bool {
        matches!(self, CoordError::SessionLost | CoordError::SessionTimeout)
    }
}

pub type CoordResult<T> = Result<T, CoordError>;

/// Map the underlying ZK client's error type onto ours. Kept in one place
/// so the rest of the crate never matches on `zookeeper::ZkError` directly.
pub(crate) fn from_zk(path: &str, err: zookeeper::ZkError) -> CoordError {
    use zookeeper::ZkError::*;
    match err {
        NoNode => CoordError::NoNode(path.to_string()),
        NodeExists => CoordError::NodeExists(path.to_string()),
        SessionExpired | ConnectionLoss | AuthFailed => CoordError::SessionLost,
        other => CoordError::Other(format!("{path}: {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_loss_variants_are_transient() {
        assert!(from_zk("/x", zookeeper::ZkError::SessionExpired).is_transient());
        assert!(from_zk("/x", zookeeper::ZkError::ConnectionLoss).is_transient());
        assert!(CoordError::SessionTimeout.is_transient());
    }

    #[test]
    fn not_found_and_exists_are_not_transient() {
        assert!(!from_zk("/x", zookeeper::ZkError::NoNode).is_transient());
        assert!(!from_zk("/x", zookeeper::ZkError::NodeExists).is_transient());
    }

    #[test]
    fn no_node_preserves_path_in_message() {
        let err = from_zk("/cluster/foo", zookeeper::ZkError::NoNode);
        assert!(matches!(err, CoordError::NoNode(ref p) if p == "/cluster/foo"));
    }
}
