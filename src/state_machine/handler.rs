use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::outcome::HandlerOutcome;
use super::states::WorkflowState;
use crate::models::{TaskId, TaskKind, TaskRecord};

/// Read-only view of a record handed to a handler
#[derive(Debug, Clone)]
pub struct TaskSnapshot<S> {
    record: TaskRecord,
    state: S,
}

impl<S: WorkflowState> TaskSnapshot<S> {
    pub fn new(record: TaskRecord, state: S) -> Self {
        Self { record, state }
    }

    pub fn task_id(&self) -> TaskId {
        self.record.task_id
    }

    pub fn kind(&self) -> TaskKind {
        self.record.kind
    }

    pub fn state(&self) -> S {
        self.state
    }

    pub fn record(&self) -> &TaskRecord {
        &self.record
    }

    pub fn payload(&self) -> &Value {
        &self.record.payload
    }

    /// String field of the payload, if present
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.record.payload.get(key).and_then(Value::as_str)
    }

    /// Deserialize a payload field into a typed value
    pub fn payload_field<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.record
            .payload
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Invocations of the current state's handler before this one
    pub fn attempt_count(&self) -> u32 {
        self.record.attempt_count()
    }

    pub fn time_in_state(&self) -> ChronoDuration {
        Utc::now() - self.record.state_entered_at
    }

    /// Cancellation hook; handlers check it before side effects
    pub fn should_stop(&self) -> bool {
        self.record.cancel_requested
    }
}

/// Unit of work for one state of one table
///
/// Handlers must be idempotent: at-least-once delivery means the same state
/// may be handled more than once.
#[async_trait]
pub trait TransitionHandler<S: WorkflowState>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, task: &TaskSnapshot<S>) -> HandlerOutcome<S>;
}
