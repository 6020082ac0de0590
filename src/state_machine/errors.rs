use thiserror::Error;

use crate::models::{TaskId, TaskKind};
use crate::store::StoreError;

/// Consistency and infrastructure failures of `advance`
///
/// Handler failures are not errors: they are recorded on the task. Anything
/// surfaced here means the record was left untouched and the message must
/// not be acknowledged.
#[derive(Error, Debug)]
pub enum StateMachineError {
    #[error("Unknown state '{state}' for {kind} task {task_id}")]
    UnknownState {
        task_id: TaskId,
        kind: TaskKind,
        state: String,
    },

    #[error("No transition registered for state '{state}' in {kind} table")]
    NoTransition { kind: TaskKind, state: String },

    #[error("Task {task_id} belongs to {actual} table, not {expected}")]
    TableMismatch {
        task_id: TaskId,
        expected: TaskKind,
        actual: TaskKind,
    },

    #[error("Concurrent modification of task {task_id}: state '{expected_state}' version {expected_version} no longer current")]
    ConcurrentModification {
        task_id: TaskId,
        expected_state: String,
        expected_version: i64,
    },

    #[error("No table registered for kind: {kind}")]
    UnregisteredTable { kind: TaskKind },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StateMachineError {
    /// Conflicts that a redelivery may resolve on its own
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentModification { .. } | Self::Store(StoreError::Database(_))
        )
    }
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
