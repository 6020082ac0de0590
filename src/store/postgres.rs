//! # PostgreSQL Task Store
//!
//! `sqlx`-backed store. The optimistic-concurrency check is a single
//! conditional `UPDATE ... WHERE state = $expected AND version = $expected`,
//! so atomicity is delegated to the database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::{StoreError, StoreResult, TaskStore};
use crate::config::DatabaseConfig;
use crate::models::{NewTask, TaskId, TaskKind, TaskRecord};

const SCHEMA_SQL: &str = include_str!("../../migrations/0001_create_fsm_tasks.sql");

const SELECT_COLUMNS: &str = "task_id, kind, state, payload, attempts, last_error, \
     cancel_requested, version, created_at, updated_at, state_entered_at, deleted_at";

#[derive(Debug, FromRow)]
struct TaskRow {
    task_id: Uuid,
    kind: String,
    state: String,
    payload: serde_json::Value,
    attempts: Json<BTreeMap<String, u32>>,
    last_error: Option<String>,
    cancel_requested: bool,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    state_entered_at: DateTime<Utc>,
    deleted_at: i64,
}

impl TryFrom<TaskRow> for TaskRecord {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let task_id = TaskId::from_uuid(row.task_id);
        let kind: TaskKind = row.kind.parse().map_err(|_| StoreError::InvalidData {
            task_id,
            field: format!("kind={}", row.kind),
        })?;

        Ok(TaskRecord {
            task_id,
            kind,
            state: row.state,
            payload: row.payload,
            created_at: row.created_at,
            updated_at: row.updated_at,
            state_entered_at: row.state_entered_at,
            last_error: row.last_error,
            attempts: row.attempts.0,
            cancel_requested: row.cancel_requested,
            version: row.version,
            deleted_at: row.deleted_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using the database section of the worker configuration
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .connect(&config.url)
            .await?;

        info!(
            pool_size = config.pool_size,
            "Connected PostgreSQL task store"
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the task table and indexes if they are missing
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        debug!("fsm_tasks schema verified");
        Ok(())
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn create(&self, new_task: NewTask) -> StoreResult<TaskId> {
        let record = TaskRecord::from_new(new_task);

        let result = sqlx::query(
            r#"
            INSERT INTO fsm_tasks
                (task_id, kind, state, payload, attempts, last_error, cancel_requested,
                 version, created_at, updated_at, state_entered_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, NULL, false, $6, $7, $7, $7, 0)
            ON CONFLICT (task_id) DO NOTHING
            "#,
        )
        .bind(record.task_id.as_uuid())
        .bind(record.kind.as_str())
        .bind(&record.state)
        .bind(&record.payload)
        .bind(Json(&record.attempts))
        .bind(record.version)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists {
                task_id: record.task_id,
            });
        }
        Ok(record.task_id)
    }

    async fn load(&self, task_id: TaskId) -> StoreResult<TaskRecord> {
        let query =
            format!("SELECT {SELECT_COLUMNS} FROM fsm_tasks WHERE task_id = $1 AND deleted_at = 0");
        let row: Option<TaskRow> = sqlx::query_as(&query)
            .bind(task_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or(StoreError::NotFound { task_id })?.try_into()
    }

    async fn compare_and_swap(
        &self,
        task_id: TaskId,
        expected_state: &str,
        expected_version: i64,
        new_record: &TaskRecord,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE fsm_tasks
            SET state = $4,
                payload = $5,
                attempts = $6,
                last_error = $7,
                cancel_requested = $8,
                version = $9,
                updated_at = $10,
                state_entered_at = $11
            WHERE task_id = $1
              AND state = $2
              AND version = $3
              AND deleted_at = 0
            "#,
        )
        .bind(task_id.as_uuid())
        .bind(expected_state)
        .bind(expected_version)
        .bind(&new_record.state)
        .bind(&new_record.payload)
        .bind(Json(&new_record.attempts))
        .bind(&new_record.last_error)
        .bind(new_record.cancel_requested)
        .bind(new_record.version)
        .bind(new_record.updated_at)
        .bind(new_record.state_entered_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn request_cancel(&self, task_id: TaskId) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE fsm_tasks
            SET cancel_requested = true, version = version + 1, updated_at = now()
            WHERE task_id = $1 AND deleted_at = 0 AND cancel_requested = false
            "#,
        )
        .bind(task_id.as_uuid())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        // Distinguish "already flagged" from "no such task"
        self.load(task_id).await.map(|_| false)
    }

    async fn find_stale_in_states(
        &self,
        kind: TaskKind,
        states: &[&str],
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<TaskId>> {
        let states: Vec<String> = states.iter().map(|s| s.to_string()).collect();
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT task_id FROM fsm_tasks
            WHERE kind = $1
              AND state = ANY($2)
              AND updated_at < $3
              AND deleted_at = 0
            ORDER BY updated_at ASC
            LIMIT $4
            "#,
        )
        .bind(kind.as_str())
        .bind(&states)
        .bind(updated_before)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(TaskId::from_uuid).collect())
    }

    fn store_name(&self) -> &'static str {
        "postgres"
    }
}
