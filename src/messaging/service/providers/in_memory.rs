//! # In-Memory Messaging Service
//!
//! Process-local queues with visibility-timeout simulation, for tests and
//! single-process development. Dead-lettered messages are kept per queue so
//! tests can inspect them.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::messaging::service::traits::{MessagingService, QueueMessage};
use crate::messaging::service::types::{
    MessageId, QueueHealthReport, QueueStats, QueuedMessage, ReceiptHandle,
};
use crate::messaging::MessagingError;

#[derive(Debug, Clone)]
struct InMemoryQueuedMessage {
    id: u64,
    payload: Vec<u8>,
    enqueued_at: DateTime<Utc>,
    /// `None` means visible now
    visible_at: Option<DateTime<Utc>>,
    receive_count: u32,
}

impl InMemoryQueuedMessage {
    fn is_visible(&self, now: DateTime<Utc>) -> bool {
        self.visible_at.map(|vt| vt <= now).unwrap_or(true)
    }
}

#[derive(Debug)]
struct InMemoryQueue {
    messages: VecDeque<InMemoryQueuedMessage>,
    dead_letters: Vec<InMemoryQueuedMessage>,
    next_id: u64,
}

impl InMemoryQueue {
    fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            dead_letters: Vec::new(),
            next_id: 1,
        }
    }

    fn position(&self, message_id: u64) -> Result<usize, MessagingError> {
        self.messages
            .iter()
            .position(|m| m.id == message_id)
            .ok_or_else(|| MessagingError::message_not_found(message_id.to_string()))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMessagingService {
    queues: RwLock<HashMap<String, InMemoryQueue>>,
}

impl InMemoryMessagingService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-initialized queues
    pub fn with_queues(queue_names: &[&str]) -> Self {
        let queues = queue_names
            .iter()
            .map(|name| (name.to_string(), InMemoryQueue::new()))
            .collect();
        Self {
            queues: RwLock::new(queues),
        }
    }

    /// Messages still in the queue, visible or not
    pub async fn queue_length(&self, queue_name: &str) -> usize {
        let queues = self.queues.read().await;
        queues.get(queue_name).map(|q| q.messages.len()).unwrap_or(0)
    }

    /// Messages currently deliverable
    pub async fn visible_count(&self, queue_name: &str) -> usize {
        let now = Utc::now();
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|q| q.messages.iter().filter(|m| m.is_visible(now)).count())
            .unwrap_or(0)
    }

    pub async fn dead_letter_count(&self, queue_name: &str) -> usize {
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|q| q.dead_letters.len())
            .unwrap_or(0)
    }

    /// Make every in-flight message visible, as if its timeout had expired
    pub async fn expire_visibility(&self, queue_name: &str) {
        let mut queues = self.queues.write().await;
        if let Some(queue) = queues.get_mut(queue_name) {
            for msg in queue.messages.iter_mut() {
                msg.visible_at = None;
            }
        }
    }

    fn parse_handle(receipt_handle: &ReceiptHandle) -> Result<u64, MessagingError> {
        receipt_handle
            .as_str()
            .parse()
            .map_err(|_| MessagingError::invalid_receipt_handle(receipt_handle.as_str()))
    }

    fn to_chrono(duration: Duration) -> Result<chrono::Duration, MessagingError> {
        chrono::Duration::from_std(duration)
            .map_err(|e| MessagingError::internal(format!("Invalid duration: {e}")))
    }
}

#[async_trait]
impl MessagingService for InMemoryMessagingService {
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        let mut queues = self.queues.write().await;
        queues
            .entry(queue_name.to_string())
            .or_insert_with(InMemoryQueue::new);
        Ok(())
    }

    async fn verify_queues(
        &self,
        queue_names: &[String],
    ) -> Result<QueueHealthReport, MessagingError> {
        let queues = self.queues.read().await;
        let mut report = QueueHealthReport::new();
        for name in queue_names {
            if queues.contains_key(name) {
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
        let payload = message.to_bytes()?;

        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let id = queue.next_id;
        queue.next_id += 1;
        queue.messages.push_back(InMemoryQueuedMessage {
            id,
            payload,
            enqueued_at: Utc::now(),
            visible_at: None,
            receive_count: 0,
        });

        Ok(MessageId::from(id))
    }

    async fn receive_messages<T: QueueMessage>(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<T>>, MessagingError> {
        let timeout = Self::to_chrono(visibility_timeout)?;
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let now = Utc::now();
        let mut received = Vec::new();

        for msg in queue.messages.iter_mut() {
            if received.len() >= max_messages {
                break;
            }
            if !msg.is_visible(now) {
                continue;
            }

            msg.visible_at = Some(now + timeout);
            msg.receive_count += 1;
            let deserialized = T::from_bytes(&msg.payload)?;

            received.push(QueuedMessage::new(
                ReceiptHandle::from(msg.id),
                deserialized,
                msg.receive_count,
                msg.enqueued_at,
            ));
        }

        Ok(received)
    }

    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        let message_id = Self::parse_handle(receipt_handle)?;
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let pos = queue.position(message_id)?;
        queue.messages.remove(pos);
        Ok(())
    }

    async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        let message_id = Self::parse_handle(receipt_handle)?;
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let pos = queue.position(message_id)?;
        if requeue {
            queue.messages[pos].visible_at = None;
        } else if let Some(msg) = queue.messages.remove(pos) {
            queue.dead_letters.push(msg);
        }
        Ok(())
    }

    async fn extend_visibility(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        extension: Duration,
    ) -> Result<(), MessagingError> {
        let message_id = Self::parse_handle(receipt_handle)?;
        let extension = Self::to_chrono(extension)?;
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let pos = queue.position(message_id)?;
        queue.messages[pos].visible_at = Some(Utc::now() + extension);
        Ok(())
    }

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        let queues = self.queues.read().await;
        let queue = queues
            .get(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let now = Utc::now();
        let in_flight = queue.messages.iter().filter(|m| !m.is_visible(now)).count() as u64;
        let mut stats = QueueStats::new(queue_name, queue.messages.len() as u64)
            .with_in_flight_count(in_flight);

        if let Some(oldest) = queue.messages.iter().map(|m| m.enqueued_at).min() {
            if let Ok(age) = (now - oldest).to_std() {
                stats = stats.with_oldest_message_age(age);
            }
        }
        Ok(stats)
    }

    async fn health_check(&self) -> Result<bool, MessagingError> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::TaskMessage;
    use crate::models::TaskId;

    const QUEUE: &str = "fsm_checklist_tasks";

    async fn service_with_message() -> (InMemoryMessagingService, TaskMessage) {
        let service = InMemoryMessagingService::with_queues(&[QUEUE]);
        let msg = TaskMessage::new(TaskId::new());
        service.send_message(QUEUE, &msg).await.unwrap();
        (service, msg)
    }

    #[tokio::test]
    async fn test_send_to_missing_queue_fails() {
        let service = InMemoryMessagingService::new();
        let err = service
            .send_message("nope", &TaskMessage::new(TaskId::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::QueueNotFound { .. }));
    }

    #[tokio::test]
    async fn test_received_message_is_invisible_until_timeout() {
        let (service, msg) = service_with_message().await;

        let first: Vec<QueuedMessage<TaskMessage>> = service
            .receive_messages(QUEUE, 10, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].message, msg);
        assert_eq!(first[0].receive_count, 1);

        let second: Vec<QueuedMessage<TaskMessage>> = service
            .receive_messages(QUEUE, 10, Duration::from_secs(30))
            .await
            .unwrap();
        assert!(second.is_empty());

        service.expire_visibility(QUEUE).await;
        let redelivered: Vec<QueuedMessage<TaskMessage>> = service
            .receive_messages(QUEUE, 10, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(redelivered[0].receive_count, 2);
    }

    #[tokio::test]
    async fn test_ack_removes_and_nack_dead_letters() {
        let (service, _) = service_with_message().await;
        service
            .send_message(QUEUE, &TaskMessage::new(TaskId::new()))
            .await
            .unwrap();

        let received: Vec<QueuedMessage<TaskMessage>> = service
            .receive_messages(QUEUE, 10, Duration::from_secs(30))
            .await
            .unwrap();
        service
            .ack_message(QUEUE, &received[0].receipt_handle)
            .await
            .unwrap();
        service
            .nack_message(QUEUE, &received[1].receipt_handle, false)
            .await
            .unwrap();

        assert_eq!(service.queue_length(QUEUE).await, 0);
        assert_eq!(service.dead_letter_count(QUEUE).await, 1);
    }

    #[tokio::test]
    async fn test_nack_requeue_makes_visible() {
        let (service, _) = service_with_message().await;
        let received: Vec<QueuedMessage<TaskMessage>> = service
            .receive_messages(QUEUE, 1, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(service.visible_count(QUEUE).await, 0);

        service
            .nack_message(QUEUE, &received[0].receipt_handle, true)
            .await
            .unwrap();
        assert_eq!(service.visible_count(QUEUE).await, 1);
    }

    #[tokio::test]
    async fn test_extend_visibility_and_stats() {
        let (service, _) = service_with_message().await;
        let received: Vec<QueuedMessage<TaskMessage>> = service
            .receive_messages(QUEUE, 1, Duration::from_millis(1))
            .await
            .unwrap();
        service
            .extend_visibility(QUEUE, &received[0].receipt_handle, Duration::from_secs(60))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let stats = service.queue_stats(QUEUE).await.unwrap();
        assert_eq!(stats.message_count, 1);
        assert_eq!(stats.in_flight_count, Some(1));
    }

    #[tokio::test]
    async fn test_invalid_receipt_handle() {
        let (service, _) = service_with_message().await;
        let err = service
            .ack_message(QUEUE, &ReceiptHandle::new("abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::InvalidReceiptHandle { .. }));
    }
}
