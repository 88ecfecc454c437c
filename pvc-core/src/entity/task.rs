//! Task entity.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Started,
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TaskProgress {
    pub current: u32,
    pub total: u32,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub result: Option<Value>,
}

impl TaskProgress {
    pub fn pending() -> Self {
        Self {
            current: 0,
            total: 1,
            status: "Pending job start".to_string(),
            result: None,
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            current: 1,
            total: 1,
            status: reason.into(),
            result: None,
        }
    }
}

/// A routed, fingerprinted unit of node-local work. `routing_key` holds either a concrete node name or the
/// sentinel `"primary"`, which the bus resolves at enqueue time — never
/// at execution time, so a primary handoff mid-queue doesn't retarget
/// already-enqueued work.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub routing_key: String,
    #[schema(value_type = Object)]
    pub kwargs: serde_json::Map<String, Value>,
    pub state: TaskState,
    pub progress: TaskProgress,
}

pub const PRIMARY_SENTINEL: &str = "primary";
