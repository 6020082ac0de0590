use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::identifiers::{TaskId, TaskKind};
use super::payload::PayloadDelta;

/// Persisted state of one unit of work
///
/// The executor never interprets `payload`; only transition handlers do.
/// Every write goes through a compare-and-swap on `(state, version)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub kind: TaskKind,
    /// Label of the current state in the kind's state set
    pub state: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// When the record last changed `state`
    pub state_entered_at: DateTime<Utc>,
    pub last_error: Option<String>,
    /// Handler invocations per state label
    #[serde(default)]
    pub attempts: BTreeMap<String, u32>,
    #[serde(default)]
    pub cancel_requested: bool,
    /// Optimistic-concurrency revision, bumped on every write
    pub version: i64,
    /// 0 means live
    #[serde(default)]
    pub deleted_at: i64,
}

impl TaskRecord {
    /// Build a fresh record from a creation request
    pub fn from_new(new_task: NewTask) -> Self {
        let now = Utc::now();
        Self {
            task_id: new_task.task_id.unwrap_or_default(),
            kind: new_task.kind,
            state: new_task.initial_state,
            payload: new_task.payload,
            created_at: now,
            updated_at: now,
            state_entered_at: now,
            last_error: None,
            attempts: BTreeMap::new(),
            cancel_requested: false,
            version: 0,
            deleted_at: 0,
        }
    }

    /// Invocation count for the current state
    pub fn attempt_count(&self) -> u32 {
        self.attempts_for(&self.state)
    }

    pub fn attempts_for(&self, state: &str) -> u32 {
        self.attempts.get(state).copied().unwrap_or(0)
    }

    pub fn is_live(&self) -> bool {
        self.deleted_at == 0
    }

    /// Next revision after a successful handler invocation. Clears `last_error`.
    pub fn advanced_to(
        &self,
        next_state: &str,
        payload_delta: Option<&PayloadDelta>,
        attempts_used: u32,
    ) -> Self {
        let now = Utc::now();
        let mut next = self.next_revision(now);
        next.attempts.insert(self.state.clone(), attempts_used);
        if let Some(delta) = payload_delta {
            delta.apply_to(&mut next.payload);
        }
        if next.state != next_state {
            next.state = next_state.to_string();
            next.state_entered_at = now;
        }
        next.last_error = None;
        next
    }

    /// Next revision recording a retryable failure; `state` is unchanged
    pub fn with_transient_failure(&self, attempts_used: u32, detail: &str) -> Self {
        let mut next = self.next_revision(Utc::now());
        next.attempts.insert(self.state.clone(), attempts_used);
        next.last_error = Some(detail.to_string());
        next
    }

    /// Next revision after a healthy poll in a wait state: the current
    /// state's failure count and `last_error` are cleared, `state` is unchanged
    pub fn with_failures_cleared(&self) -> Self {
        let mut next = self.next_revision(Utc::now());
        next.attempts.remove(&self.state);
        next.last_error = None;
        next
    }

    /// Next revision moved into the kind's error state
    pub fn failed(&self, error_state: &str, attempts_used: u32, detail: &str) -> Self {
        let now = Utc::now();
        let mut next = self.next_revision(now);
        next.attempts.insert(self.state.clone(), attempts_used);
        next.state = error_state.to_string();
        next.state_entered_at = now;
        next.last_error = Some(detail.to_string());
        next
    }

    fn next_revision(&self, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.version = self.version + 1;
        next.updated_at = now;
        next
    }
}

/// Creation request handed to a task store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    /// Caller-chosen id; generated when absent
    pub task_id: Option<TaskId>,
    pub kind: TaskKind,
    pub initial_state: String,
    pub payload: Value,
}

impl NewTask {
    pub fn new(kind: TaskKind, initial_state: impl Into<String>, payload: Value) -> Self {
        Self {
            task_id: None,
            kind,
            initial_state: initial_state.into(),
            payload,
        }
    }

    pub fn with_task_id(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> TaskRecord {
        TaskRecord::from_new(NewTask::new(
            TaskKind::Checklist,
            "created",
            json!({"organization_id": "org-1"}),
        ))
    }

    #[test]
    fn test_new_record_defaults() {
        let r = record();
        assert_eq!(r.state, "created");
        assert_eq!(r.version, 0);
        assert_eq!(r.attempt_count(), 0);
        assert!(r.is_live());
        assert!(r.last_error.is_none());
    }

    #[test]
    fn test_advanced_to_bumps_version_and_clears_error() {
        let r = record().with_transient_failure(1, "timeout");
        assert_eq!(r.last_error.as_deref(), Some("timeout"));
        assert_eq!(r.state, "created");
        assert_eq!(r.version, 1);

        let delta = PayloadDelta::new().with("run_id", "run-7");
        let next = r.advanced_to("started", Some(&delta), 2);
        assert_eq!(next.state, "started");
        assert_eq!(next.version, 2);
        assert_eq!(next.attempts_for("created"), 2);
        assert_eq!(next.attempt_count(), 0);
        assert!(next.last_error.is_none());
        assert_eq!(next.payload["run_id"], "run-7");
        assert!(next.state_entered_at >= r.state_entered_at);
    }

    #[test]
    fn test_failures_cleared_keeps_state_and_other_counts() {
        let mut base = record();
        base.attempts.insert("started".to_string(), 1);
        let failing = base.with_transient_failure(2, "timeout");
        let cleared = failing.with_failures_cleared();
        assert_eq!(cleared.state, failing.state);
        assert_eq!(cleared.version, failing.version + 1);
        assert_eq!(cleared.attempt_count(), 0);
        assert_eq!(cleared.attempts_for("started"), 1);
        assert!(cleared.last_error.is_none());
    }

    #[test]
    fn test_failed_moves_to_error_state() {
        let next = record().failed("error", 1, "dependency not found");
        assert_eq!(next.state, "error");
        assert_eq!(next.attempts_for("created"), 1);
        assert_eq!(next.last_error.as_deref(), Some("dependency not found"));
    }
}
