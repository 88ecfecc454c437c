pub mod faults;
pub mod metrics;
pub mod nodes;
pub mod storage;
pub mod tasks;
pub mod vms;

use serde::Serialize;
use utoipa::ToSchema;

/// Shape returned by every task-creating endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct TaskAccepted {
    pub task_id: String,
    pub task_name: String,
    pub run_on: String,
}
