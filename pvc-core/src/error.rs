//! Core error surface. Every operation exposed by `pvc-core`
//! returns `PvcResult`; the HTTP adapter in `pvc-coordinatord` maps each
//! variant onto a status code the same way the teacher's
//! `StoreError -> ApiError` conversion does.

use pvc_coord::CoordError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PvcError {
    /// Bad input caught before it ever touches coordination state.
    #[error("validation: {0}")]
    Validation(String),

    /// The referenced entity (VM, network, OSD, fault, task, node) doesn't
    /// exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The entity exists but isn't in a state that allows the requested
    /// transition.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// The coordination session died mid-operation. Transient: the caller
    /// reconnects and the reconciler re-derives state from watches.
    #[error("coordination lost: {0}")]
    CoordinationLost(String),

    /// An external executor (libvirt, Ceph, IPMI) returned failure.
    #[error("executor failure ({executor}): {detail}")]
    ExecutorFailure { executor: &'static str, detail: String },

    /// The fencing monitor could not confirm a power action; the caller
    /// must not proceed to VM reassignment.
    #[error("fence failure: {0}")]
    FenceFailure(String),

    /// Placement could not find a candidate node.
    #[error("placement failed: {0}")]
    PlacementFailed(String),
}

pub type PvcResult<T> = Result<T, PvcError>;

impl From<serde_json::Error> for PvcError {
    fn from(e: serde_json::Error) -> Self {
        PvcError::Validation(format!("malformed payload: {e}"))
    }
}

impl From<CoordError> for PvcError {
    fn from(e: CoordError) -> Self {
        if e.is_transient() {
            PvcError::CoordinationLost(e.to_string())
        } else {
            match e {
                CoordError::NoNode(key) => PvcError::NotFound(key),
                other => PvcError::CoordinationLost(other.to_string()),
            }
        }
    }
}

impl PvcError {
    /// HTTP-status-equivalent bucket, consumed by the REST adapter's
    /// `From<PvcError> for ApiError`.
    pub fn status_code(&self) -> u16 {
        match self {
            PvcError::Validation(_) => 400,
            PvcError::NotFound(_) => 404,
            PvcError::Precondition(_) => 400,
            PvcError::PlacementFailed(_) => 400,
            PvcError::CoordinationLost(_) => 503,
            PvcError::ExecutorFailure { .. } => 502,
            PvcError::FenceFailure(_) => 502,
        }
    }
}
