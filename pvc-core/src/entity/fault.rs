//! Fault entity. Ids are a stable content hash of
//! `(kind, subject, message-template)` so the same underlying condition
//! recurring bumps `last_reported` instead of creating a duplicate
//!.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FaultStatus {
    New,
    Ack,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Fault {
    pub id: String,
    pub first_reported: DateTime<Utc>,
    pub last_reported: DateTime<Utc>,
    pub status: FaultStatus,
    pub health_delta: u8,
    pub message: String,
    /// When `acknowledge` was last called. `None` until then; a later
    /// `re_report` does not clear it back to `None` since `re_report`
    /// does not reset `status` to `New` either.
    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
}

/// Derive a fault's stable id. Same `(kind, subject, template)` always
/// yields the same id, across process restarts —
/// the id deliberately excludes `message`, since the fully-rendered
/// message (e.g. with a live byte count) can vary between detections of
/// the same underlying condition.
pub fn fault_id(kind: &str, subject: &str, message_template: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update(b"\0");
    hasher.update(subject.as_bytes());
    hasher.update(b"\0");
    hasher.update(message_template.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

impl Fault {
    pub fn new(kind: &str, subject: &str, message_template: &str, health_delta: u8, message: String) -> Self {
        let now = Utc::now();
        Self {
            id: fault_id(kind, subject, message_template),
            first_reported: now,
            last_reported: now,
            status: FaultStatus::New,
            health_delta,
            message,
            acknowledged_at: None,
        }
    }

    pub fn acknowledge(&mut self) {
        self.status = FaultStatus::Ack;
        self.acknowledged_at = Some(Utc::now());
    }

    pub fn re_report(&mut self, health_delta: u8, message: String) {
        self.last_reported = Utc::now();
        self.health_delta = health_delta;
        self.message = message;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_id_is_stable_across_invocations() {
        let a = fault_id("disk_free", "hvA:/var", "{subject} below threshold");
        let b = fault_id("disk_free", "hvA:/var", "{subject} below threshold");
        assert_eq!(a, b);
    }

    #[test]
    fn fault_id_ignores_rendered_message() {
        let f1 = Fault::new("disk_free", "hvA:/var", "tpl", 10, "12% free".into());
        let f2 = Fault::new("disk_free", "hvA:/var", "tpl", 20, "3% free".into());
        assert_eq!(f1.id, f2.id);
    }

    #[test]
    fn distinct_subjects_get_distinct_ids() {
        let a = fault_id("disk_free", "hvA:/var", "tpl");
        let b = fault_id("disk_free", "hvB:/var", "tpl");
        assert_ne!(a, b);
    }

    #[test]
    fn acknowledge_stamps_acknowledged_at() {
        let mut f = Fault::new("disk_free", "hvA:/var", "tpl", 10, "12% free".into());
        assert!(f.acknowledged_at.is_none());
        f.acknowledge();
        assert_eq!(f.status, FaultStatus::Ack);
        assert!(f.acknowledged_at.is_some());
    }
}
