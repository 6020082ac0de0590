use serde::{Deserialize, Serialize};

use crate::models::{TaskId, TaskKind};

/// Queue envelope: `{"task_id": "<uuid>", "table": "checklist"}`
///
/// `table` is optional; a consumer falls back to the kind its queue serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<TaskKind>,
}

impl TaskMessage {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            table: None,
        }
    }

    pub fn for_table(task_id: TaskId, table: TaskKind) -> Self {
        Self {
            task_id,
            table: Some(table),
        }
    }

    /// Kind to route to, given the consumer's default
    pub fn route(&self, default_kind: TaskKind) -> TaskKind {
        self.table.unwrap_or(default_kind)
    }
}
