//! # Task Store
//!
//! Persistence contract for task records. The store is the single shared
//! mutable resource of the system; all writes after creation go through
//! [`TaskStore::compare_and_swap`] so concurrent executors can never
//! overwrite each other.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{NewTask, TaskId, TaskKind, TaskRecord};

pub use memory::InMemoryTaskStore;
pub use postgres::PgTaskStore;

/// Errors raised by task store implementations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Task not found: {task_id}")]
    NotFound { task_id: TaskId },

    #[error("Task already exists: {task_id}")]
    AlreadyExists { task_id: TaskId },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid stored data for {task_id}: {field}")]
    InvalidData { task_id: TaskId, field: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence substrate for task records
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    /// Persist a new record and return its id
    async fn create(&self, new_task: NewTask) -> StoreResult<TaskId>;

    /// Load the live record for `task_id`
    async fn load(&self, task_id: TaskId) -> StoreResult<TaskRecord>;

    /// Replace the record only if the persisted `state` and `version` still
    /// match what the caller read. Returns `false` when the swap was rejected.
    async fn compare_and_swap(
        &self,
        task_id: TaskId,
        expected_state: &str,
        expected_version: i64,
        new_record: &TaskRecord,
    ) -> StoreResult<bool>;

    /// Flag the task so handlers stop at their next check
    async fn request_cancel(&self, task_id: TaskId) -> StoreResult<bool>;

    /// Live tasks of `kind` in one of `states` whose last update is older than `updated_before`
    async fn find_stale_in_states(
        &self,
        kind: TaskKind,
        states: &[&str],
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<TaskId>>;

    /// Implementation name for logging
    fn store_name(&self) -> &'static str;
}
