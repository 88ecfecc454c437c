//! Audit logging shared by `pvc-coordinatord` and `pvc-noded`.
//!
//! Grounded in the teacher's `AuditLogger` (always-local, best-effort
//! remote): every event always goes through `tracing` first, so nothing
//! is ever silently lost. The remote half of the teacher's logger shipped
//! events to a separate gRPC log service; that service has no counterpart
//! here, so this crate keeps only the local, always-on half plus an
//! in-memory ring buffer the HTTP adapter can expose for operators who
//! want recent audit events without a log aggregator.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of an audit event, modeled on syslog levels the way the
/// teacher's `LogLevel` does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Critical,
    Error,
    Warn,
    Notice,
    Info,
    Debug,
}

/// One recorded audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub component: String,
    pub message: String,
    pub object_ids: Vec<String>,
}

const RING_CAPACITY: usize = 512;

/// Component-scoped audit logger. One instance per daemon, held behind an
/// `Arc` and handed to every reconciler/controller that needs to record
/// an audit-worthy event.
pub struct AuditLogger {
    component: String,
    recent: Mutex<VecDeque<AuditEvent>>,
}

impl AuditLogger {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            recent: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
        }
    }

    /// Record an audit event: always via `tracing`, and kept in a bounded
    /// in-memory ring so `GET /metrics`-adjacent operator tooling can read
    /// recent events without a log aggregator.
    pub fn log(&self, level: LogLevel, message: impl Into<String>, object_ids: Vec<String>) {
        let message = message.into();

        match level {
            LogLevel::Critical | LogLevel::Error => {
                tracing::error!(target: "audit", component = %self.component, objects = ?object_ids, "{message}")
            }
            LogLevel::Warn => {
                tracing::warn!(target: "audit", component = %self.component, objects = ?object_ids, "{message}")
            }
            LogLevel::Notice | LogLevel::Info => {
                tracing::info!(target: "audit", component = %self.component, objects = ?object_ids, "{message}")
            }
            LogLevel::Debug => {
                tracing::debug!(target: "audit", component = %self.component, objects = ?object_ids, "{message}")
            }
        }

        let event = AuditEvent {
            timestamp: Utc::now(),
            level,
            component: self.component.clone(),
            message,
            object_ids,
        };

        let mut recent = self.recent.lock().expect("audit ring mutex poisoned");
        if recent.len() == RING_CAPACITY {
            recent.pop_front();
        }
        recent.push_back(event);
    }

    /// Snapshot of the most recent events, newest last.
    pub fn recent(&self) -> Vec<AuditEvent> {
        self.recent
            .lock()
            .expect("audit ring mutex poisoned")
            .iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_bounds_memory() {
        let logger = AuditLogger::new("test");
        for i in 0..(RING_CAPACITY + 10) {
            logger.log(LogLevel::Info, format!("event {i}"), vec![]);
        }
        assert_eq!(logger.recent().len(), RING_CAPACITY);
        assert_eq!(logger.recent().last().unwrap().message, "event 521");
    }

    #[test]
    fn events_capture_level_and_objects() {
        let logger = AuditLogger::new("placement");
        logger.log(LogLevel::Warn, "no candidate nodes", vec!["vm-1".into()]);
        let events = logger.recent();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, LogLevel::Warn);
        assert_eq!(events[0].object_ids, vec!["vm-1".to_string()]);
    }
}
