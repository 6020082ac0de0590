//! # In-Memory Task Store
//!
//! `DashMap`-backed store for tests and single-process development. Each
//! compare-and-swap runs under the shard lock of its entry, which gives the
//! same atomicity a conditional `UPDATE` gives in PostgreSQL.
//!
//! ```rust
//! use fsm_worker::models::{NewTask, TaskKind};
//! use fsm_worker::store::{InMemoryTaskStore, TaskStore};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let store = InMemoryTaskStore::new();
//! let id = store
//!     .create(NewTask::new(TaskKind::Report, "created", json!({"schedule_id": "s-1"})))
//!     .await?;
//!
//! let read = store.load(id).await?;
//! let next = read.advanced_to("started", None, 1);
//! assert!(store.compare_and_swap(id, "created", read.version, &next).await?);
//! // the same read cannot be applied twice
//! assert!(!store.compare_and_swap(id, "created", read.version, &next).await?);
//! # Ok::<(), fsm_worker::store::StoreError>(())
//! # }).unwrap();
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{StoreError, StoreResult, TaskStore};
use crate::models::{NewTask, TaskId, TaskKind, TaskRecord};

#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: DashMap<TaskId, TaskRecord>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a record unconditionally (test setup only)
    pub fn insert_raw(&self, record: TaskRecord) {
        self.tasks.insert(record.task_id, record);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, new_task: NewTask) -> StoreResult<TaskId> {
        let record = TaskRecord::from_new(new_task);
        let task_id = record.task_id;
        match self.tasks.entry(task_id) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists { task_id }),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(task_id)
            }
        }
    }

    async fn load(&self, task_id: TaskId) -> StoreResult<TaskRecord> {
        self.tasks
            .get(&task_id)
            .filter(|r| r.is_live())
            .map(|r| r.value().clone())
            .ok_or(StoreError::NotFound { task_id })
    }

    async fn compare_and_swap(
        &self,
        task_id: TaskId,
        expected_state: &str,
        expected_version: i64,
        new_record: &TaskRecord,
    ) -> StoreResult<bool> {
        let Some(mut current) = self.tasks.get_mut(&task_id) else {
            return Err(StoreError::NotFound { task_id });
        };

        if !current.is_live()
            || current.state != expected_state
            || current.version != expected_version
        {
            return Ok(false);
        }

        *current = new_record.clone();
        Ok(true)
    }

    async fn request_cancel(&self, task_id: TaskId) -> StoreResult<bool> {
        let Some(mut current) = self.tasks.get_mut(&task_id) else {
            return Err(StoreError::NotFound { task_id });
        };
        if current.cancel_requested {
            return Ok(false);
        }
        current.cancel_requested = true;
        current.version += 1;
        current.updated_at = Utc::now();
        Ok(true)
    }

    async fn find_stale_in_states(
        &self,
        kind: TaskKind,
        states: &[&str],
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<TaskId>> {
        let mut matches: Vec<(DateTime<Utc>, TaskId)> = self
            .tasks
            .iter()
            .filter(|r| {
                r.is_live()
                    && r.kind == kind
                    && r.updated_at < updated_before
                    && states.contains(&r.state.as_str())
            })
            .map(|r| (r.updated_at, r.task_id))
            .collect();

        matches.sort();
        Ok(matches.into_iter().take(limit).map(|(_, id)| id).collect())
    }

    fn store_name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_task() -> NewTask {
        NewTask::new(TaskKind::Report, "created", json!({"organization_id": "org-1"}))
    }

    #[tokio::test]
    async fn test_create_and_load() {
        let store = InMemoryTaskStore::new();
        let id = store.create(new_task()).await.unwrap();
        let record = store.load(id).await.unwrap();
        assert_eq!(record.state, "created");
        assert_eq!(record.kind, TaskKind::Report);
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let store = InMemoryTaskStore::new();
        let id = TaskId::new();
        store.create(new_task().with_task_id(id)).await.unwrap();
        let err = store.create(new_task().with_task_id(id)).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_compare_and_swap_rejects_stale_version() {
        let store = InMemoryTaskStore::new();
        let id = store.create(new_task()).await.unwrap();
        let read = store.load(id).await.unwrap();

        let first = read.advanced_to("started", None, 1);
        assert!(store
            .compare_and_swap(id, &read.state, read.version, &first)
            .await
            .unwrap());

        // Second writer still holds the old revision
        let second = read.failed("error", 1, "boom");
        assert!(!store
            .compare_and_swap(id, &read.state, read.version, &second)
            .await
            .unwrap());

        let persisted = store.load(id).await.unwrap();
        assert_eq!(persisted.state, "started");
        assert!(persisted.last_error.is_none());
    }

    #[tokio::test]
    async fn test_soft_deleted_records_are_invisible() {
        let store = InMemoryTaskStore::new();
        let mut record = TaskRecord::from_new(new_task());
        record.deleted_at = 1_700_000_000;
        let id = record.task_id;
        store.insert_raw(record);

        assert!(matches!(
            store.load(id).await.unwrap_err(),
            StoreError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_find_stale_in_states() {
        let store = InMemoryTaskStore::new();
        let waiting = store.create(new_task()).await.unwrap();
        let mut record = store.load(waiting).await.unwrap();
        record.state = "working".to_string();
        record.updated_at = Utc::now() - chrono::Duration::minutes(10);
        store.insert_raw(record);
        store.create(new_task()).await.unwrap();

        let found = store
            .find_stale_in_states(
                TaskKind::Report,
                &["working"],
                Utc::now() - chrono::Duration::minutes(1),
                10,
            )
            .await
            .unwrap();
        assert_eq!(found, vec![waiting]);
    }

    #[tokio::test]
    async fn test_request_cancel_is_idempotent() {
        let store = InMemoryTaskStore::new();
        let id = store.create(new_task()).await.unwrap();
        assert!(store.request_cancel(id).await.unwrap());
        assert!(!store.request_cancel(id).await.unwrap());
        assert!(store.load(id).await.unwrap().cancel_requested);
    }
}
