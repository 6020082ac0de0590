//! # Task Scheduler
//!
//! Creates task records and places their ids on the per-kind queues.

use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use crate::config::QueueNames;
use crate::error::Result;
use crate::logging::log_queue_operation;
use crate::messaging::{MessageId, MessagingService, TaskMessage};
use crate::models::{NewTask, TaskId, TaskKind};
use crate::state_machine::ExecutorRegistry;
use crate::store::TaskStore;

pub struct TaskScheduler<M: MessagingService> {
    store: Arc<dyn TaskStore>,
    messaging: Arc<M>,
    registry: Arc<ExecutorRegistry>,
    queues: QueueNames,
}

impl<M: MessagingService> std::fmt::Debug for TaskScheduler<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("store", &self.store.store_name())
            .field("provider", &self.messaging.provider_name())
            .field("queues", &self.queues)
            .finish()
    }
}

impl<M: MessagingService> TaskScheduler<M> {
    pub fn new(
        store: Arc<dyn TaskStore>,
        messaging: Arc<M>,
        registry: Arc<ExecutorRegistry>,
        queues: QueueNames,
    ) -> Self {
        Self {
            store,
            messaging,
            registry,
            queues,
        }
    }

    /// Create a record in the table's initial state and enqueue it
    pub async fn schedule(&self, kind: TaskKind, payload: Value) -> Result<TaskId> {
        self.schedule_new(NewTask::new(kind, self.initial_state(kind)?, payload))
            .await
    }

    /// Same as [`schedule`](Self::schedule) with a caller-chosen id
    pub async fn schedule_with_id(
        &self,
        task_id: TaskId,
        kind: TaskKind,
        payload: Value,
    ) -> Result<TaskId> {
        let new_task = NewTask::new(kind, self.initial_state(kind)?, payload).with_task_id(task_id);
        self.schedule_new(new_task).await
    }

    async fn schedule_new(&self, new_task: NewTask) -> Result<TaskId> {
        let kind = new_task.kind;
        let task_id = self.store.create(new_task).await?;
        self.enqueue(task_id, kind).await?;
        info!(task_id = %task_id, kind = %kind, "Task scheduled");
        Ok(task_id)
    }

    /// Publish a message asking the `kind` executor to advance `task_id`
    pub async fn enqueue(&self, task_id: TaskId, kind: TaskKind) -> Result<MessageId> {
        let queue = self.queues.for_kind(kind);
        let message_id = self
            .messaging
            .send_message(queue, &TaskMessage::for_table(task_id, kind))
            .await?;
        log_queue_operation(
            "enqueue",
            queue,
            Some(task_id),
            "sent",
            Some(message_id.as_str()),
        );
        Ok(message_id)
    }

    /// Flag the task for cancellation and enqueue it so its handler sees the flag
    pub async fn request_cancel(&self, task_id: TaskId, kind: TaskKind) -> Result<bool> {
        let flagged = self.store.request_cancel(task_id).await?;
        if flagged {
            self.enqueue(task_id, kind).await?;
            info!(task_id = %task_id, kind = %kind, "Cancellation requested");
        }
        Ok(flagged)
    }

    fn initial_state(&self, kind: TaskKind) -> Result<&'static str> {
        Ok(self.registry.get(kind)?.initial_state())
    }
}
