//! # PGMQ Messaging Service
//!
//! Calls the `pgmq.*` SQL functions directly through `sqlx`. Acked messages
//! are deleted; dead-lettered messages are archived to `pgmq.a_<queue>`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use tracing::debug;

use crate::messaging::service::traits::{MessagingService, QueueMessage};
use crate::messaging::service::types::{
    MessageId, QueueHealthReport, QueueStats, QueuedMessage, ReceiptHandle,
};
use crate::messaging::MessagingError;

#[derive(Debug, FromRow)]
struct PgmqRow {
    msg_id: i64,
    read_ct: i32,
    enqueued_at: DateTime<Utc>,
    message: Value,
}

#[derive(Debug, FromRow)]
struct PgmqMetricsRow {
    queue_length: i64,
    oldest_msg_age_sec: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct PgmqMessagingService {
    pool: PgPool,
}

impl PgmqMessagingService {
    pub fn new_with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn message_id(receipt_handle: &ReceiptHandle) -> Result<i64, MessagingError> {
        receipt_handle
            .as_i64()
            .ok_or_else(|| MessagingError::invalid_receipt_handle(receipt_handle.as_str()))
    }

    /// PGMQ timeouts are whole seconds; round up so short delays still hide the message
    fn whole_seconds(duration: Duration) -> i32 {
        let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
        secs.min(i32::MAX as u64) as i32
    }
}

#[async_trait]
impl MessagingService for PgmqMessagingService {
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue_name)
            .execute(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "create", e.to_string()))?;
        debug!(queue = %queue_name, "PGMQ queue ensured");
        Ok(())
    }

    async fn verify_queues(
        &self,
        queue_names: &[String],
    ) -> Result<QueueHealthReport, MessagingError> {
        let existing: Vec<String> = sqlx::query_scalar("SELECT queue_name FROM pgmq.list_queues()")
            .fetch_all(&self.pool)
            .await?;

        let mut report = QueueHealthReport::new();
        for name in queue_names {
            if existing.contains(name) {
                report.add_healthy(name);
            } else {
                report.add_missing(name);
            }
        }
        Ok(report)
    }

    async fn send_message<T: QueueMessage>(
        &self,
        queue_name: &str,
        message: &T,
    ) -> Result<MessageId, MessagingError> {
        let json_value: Value = serde_json::from_slice(&message.to_bytes()?)
            .map_err(|e| MessagingError::message_serialization(e.to_string()))?;

        let msg_id: i64 = sqlx::query_scalar("SELECT pgmq.send($1, $2)")
            .bind(queue_name)
            .bind(&json_value)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "send", e.to_string()))?;

        Ok(MessageId::from(msg_id))
    }

    async fn receive_messages<T: QueueMessage>(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<T>>, MessagingError> {
        let rows: Vec<PgmqRow> = sqlx::query_as(
            "SELECT msg_id, read_ct, enqueued_at, message FROM pgmq.read($1, $2, $3)",
        )
        .bind(queue_name)
        .bind(Self::whole_seconds(visibility_timeout))
        .bind(max_messages as i32)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MessagingError::queue_operation(queue_name, "read", e.to_string()))?;

        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            let bytes = serde_json::to_vec(&row.message)
                .map_err(|e| MessagingError::message_serialization(e.to_string()))?;
            let deserialized = T::from_bytes(&bytes)?;
            result.push(QueuedMessage::new(
                ReceiptHandle::from(row.msg_id),
                deserialized,
                row.read_ct.max(0) as u32,
                row.enqueued_at,
            ));
        }
        Ok(result)
    }

    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        let message_id = Self::message_id(receipt_handle)?;
        let deleted: bool = sqlx::query_scalar("SELECT pgmq.delete($1, $2)")
            .bind(queue_name)
            .bind(message_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "delete", e.to_string()))?;

        if !deleted {
            return Err(MessagingError::message_not_found(message_id.to_string()));
        }
        Ok(())
    }

    async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        let message_id = Self::message_id(receipt_handle)?;

        if requeue {
            sqlx::query("SELECT msg_id FROM pgmq.set_vt($1, $2, 0)")
                .bind(queue_name)
                .bind(message_id)
                .execute(&self.pool)
                .await
                .map_err(|e| MessagingError::queue_operation(queue_name, "set_vt", e.to_string()))?;
            return Ok(());
        }

        let archived: bool = sqlx::query_scalar("SELECT pgmq.archive($1, $2)")
            .bind(queue_name)
            .bind(message_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "archive", e.to_string()))?;

        if !archived {
            return Err(MessagingError::message_not_found(message_id.to_string()));
        }
        Ok(())
    }

    async fn extend_visibility(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        extension: Duration,
    ) -> Result<(), MessagingError> {
        let message_id = Self::message_id(receipt_handle)?;
        let updated: Option<i64> = sqlx::query_scalar("SELECT msg_id FROM pgmq.set_vt($1, $2, $3)")
            .bind(queue_name)
            .bind(message_id)
            .bind(Self::whole_seconds(extension))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "set_vt", e.to_string()))?;

        if updated.is_none() {
            return Err(MessagingError::message_not_found(message_id.to_string()));
        }
        Ok(())
    }

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        let row: Option<PgmqMetricsRow> =
            sqlx::query_as("SELECT queue_length, oldest_msg_age_sec FROM pgmq.metrics($1)")
                .bind(queue_name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| MessagingError::queue_operation(queue_name, "metrics", e.to_string()))?;

        let row = row.ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        let mut stats = QueueStats::new(queue_name, row.queue_length.max(0) as u64);
        if let Some(age) = row.oldest_msg_age_sec {
            stats = stats.with_oldest_message_age(Duration::from_secs(age.max(0) as u64));
        }
        Ok(stats)
    }

    async fn health_check(&self) -> Result<bool, MessagingError> {
        let one: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(one == 1)
    }

    fn provider_name(&self) -> &'static str {
        "pgmq"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_seconds_rounds_up() {
        assert_eq!(PgmqMessagingService::whole_seconds(Duration::from_secs(0)), 0);
        assert_eq!(PgmqMessagingService::whole_seconds(Duration::from_millis(1)), 1);
        assert_eq!(PgmqMessagingService::whole_seconds(Duration::from_millis(1500)), 2);
        assert_eq!(PgmqMessagingService::whole_seconds(Duration::from_secs(30)), 30);
    }
}
