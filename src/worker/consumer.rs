//! # Queue Consumer
//!
//! Bridges one broker queue to the executor registry. Ack discipline:
//!
//! - `advance` returned `Ok` and the task needs nothing further from this
//!   message: ack.
//! - retry scheduled: keep the message invisible for the retry delay, no ack.
//! - chain bound hit: publish a continuation message, then ack.
//! - `advance` returned `Err`: no ack, the visibility timeout redelivers it;
//!   after `max_receive_count` deliveries the message is dead-lettered.
//! - the broker call settling a message failed: the message is reported
//!   `Unsettled` and the rest of the batch is still processed.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::ConsumerConfig;
use crate::logging::log_queue_operation;
use crate::messaging::{MessagingResult, MessagingService, QueuedMessage, TaskMessage};
use crate::models::TaskKind;
use crate::state_machine::{AdvanceOutcome, AdvanceReport, ExecutorRegistry};

/// What the consumer did with one message
#[derive(Debug, Clone, PartialEq)]
pub enum MessageDisposition {
    /// Executor finished with this message; it was deleted
    Acked { report: AdvanceReport },
    /// Transient failure recorded; message hidden for `delay` then redelivered
    Deferred {
        report: AdvanceReport,
        delay: Duration,
    },
    /// Chain bound hit; a fresh message was published and this one acked
    Continued { report: AdvanceReport },
    /// Executor failed; message left for redelivery after the visibility timeout
    LeftForRedelivery { error: String },
    /// Undecodable or repeatedly failing message moved to the dead-letter archive
    DeadLettered { error: String },
    /// Broker rejected the ack, defer or dead-letter call; redelivered after
    /// the visibility timeout
    Unsettled { error: String },
}

pub struct QueueConsumer<M: MessagingService> {
    messaging: Arc<M>,
    registry: Arc<ExecutorRegistry>,
    queue_name: String,
    default_kind: TaskKind,
    batch_size: usize,
    visibility_timeout: Duration,
    poll_interval: Duration,
    max_receive_count: u32,
}

impl<M: MessagingService> std::fmt::Debug for QueueConsumer<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueConsumer")
            .field("provider", &self.messaging.provider_name())
            .field("queue_name", &self.queue_name)
            .field("default_kind", &self.default_kind)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl<M: MessagingService> QueueConsumer<M> {
    /// Consumer for the queue that `config` assigns to `kind`
    pub fn new(
        messaging: Arc<M>,
        registry: Arc<ExecutorRegistry>,
        kind: TaskKind,
        config: &ConsumerConfig,
    ) -> Self {
        Self {
            messaging,
            registry,
            queue_name: config.queues.for_kind(kind).to_string(),
            default_kind: kind,
            batch_size: config.batch_size,
            visibility_timeout: config.visibility_timeout(),
            poll_interval: config.poll_interval(),
            max_receive_count: config.max_receive_count,
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Receive one batch and process its messages one at a time. Only the
    /// receive itself can fail the batch.
    pub async fn process_batch(&self) -> MessagingResult<Vec<MessageDisposition>> {
        let messages: Vec<QueuedMessage<Value>> = self
            .messaging
            .receive_messages(&self.queue_name, self.batch_size, self.visibility_timeout)
            .await?;

        if !messages.is_empty() {
            debug!(queue = %self.queue_name, count = messages.len(), "Received batch");
        }

        let mut dispositions = Vec::with_capacity(messages.len());
        for message in &messages {
            let disposition = match self.process_message(message).await {
                Ok(disposition) => disposition,
                Err(e) => {
                    error!(
                        queue = %self.queue_name,
                        receipt = %message.receipt_handle,
                        error = %e,
                        "Failed to settle message"
                    );
                    MessageDisposition::Unsettled {
                        error: e.to_string(),
                    }
                }
            };
            dispositions.push(disposition);
        }
        Ok(dispositions)
    }

    pub async fn process_message(
        &self,
        message: &QueuedMessage<Value>,
    ) -> MessagingResult<MessageDisposition> {
        let task_message: TaskMessage = match serde_json::from_value(message.message.clone()) {
            Ok(m) => m,
            Err(e) => {
                let error = format!("Undecodable task message: {e}");
                warn!(queue = %self.queue_name, receipt = %message.receipt_handle, "{error}");
                return self.dead_letter(message, None, error).await;
            }
        };

        let kind = task_message.route(self.default_kind);
        let task_id = task_message.task_id;

        match self.registry.advance(kind, task_id).await {
            Ok(report) => self.settle(message, kind, report).await,
            Err(e) => {
                let error = e.to_string();
                if message.receive_count >= self.max_receive_count {
                    error!(
                        queue = %self.queue_name,
                        task_id = %task_id,
                        receive_count = message.receive_count,
                        error = %error,
                        "Giving up on message after repeated failures"
                    );
                    return self.dead_letter(message, Some(task_id), error).await;
                }

                warn!(
                    queue = %self.queue_name,
                    task_id = %task_id,
                    receive_count = message.receive_count,
                    retryable = e.is_retryable(),
                    error = %error,
                    "Advance failed; leaving message for redelivery"
                );
                Ok(MessageDisposition::LeftForRedelivery { error })
            }
        }
    }

    async fn settle(
        &self,
        message: &QueuedMessage<Value>,
        kind: TaskKind,
        report: AdvanceReport,
    ) -> MessagingResult<MessageDisposition> {
        let task_id = report.task_id;
        match &report.outcome {
            AdvanceOutcome::RetryScheduled { delay, attempt, .. } => {
                let delay = *delay;
                self.messaging
                    .extend_visibility(&self.queue_name, &message.receipt_handle, delay)
                    .await?;
                log_queue_operation(
                    "defer",
                    &self.queue_name,
                    Some(task_id),
                    "retry_scheduled",
                    Some(&format!("attempt {attempt}, delay {}ms", delay.as_millis())),
                );
                Ok(MessageDisposition::Deferred { report, delay })
            }
            AdvanceOutcome::ChainLimitReached { .. } => {
                self.messaging
                    .send_message(&self.queue_name, &TaskMessage::for_table(task_id, kind))
                    .await?;
                self.messaging
                    .ack_message(&self.queue_name, &message.receipt_handle)
                    .await?;
                log_queue_operation("continue", &self.queue_name, Some(task_id), "requeued", None);
                Ok(MessageDisposition::Continued { report })
            }
            _ => {
                self.messaging
                    .ack_message(&self.queue_name, &message.receipt_handle)
                    .await?;
                debug!(
                    queue = %self.queue_name,
                    task_id = %task_id,
                    state = %report.final_state(),
                    transitions = report.transitions,
                    "Message acked"
                );
                Ok(MessageDisposition::Acked { report })
            }
        }
    }

    async fn dead_letter(
        &self,
        message: &QueuedMessage<Value>,
        task_id: Option<crate::models::TaskId>,
        error: String,
    ) -> MessagingResult<MessageDisposition> {
        self.messaging
            .nack_message(&self.queue_name, &message.receipt_handle, false)
            .await?;
        log_queue_operation(
            "dead_letter",
            &self.queue_name,
            task_id,
            "dead_lettered",
            Some(&error),
        );
        Ok(MessageDisposition::DeadLettered { error })
    }

    /// Poll until `shutdown` flips to `true`
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            queue = %self.queue_name,
            kind = %self.default_kind,
            provider = self.messaging.provider_name(),
            "🚀 Queue consumer started"
        );

        while !*shutdown.borrow() {
            let idle = match self.process_batch().await {
                Ok(dispositions) => dispositions.is_empty(),
                Err(e) => {
                    error!(queue = %self.queue_name, error = %e, "Failed to process batch");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = shutdown.changed() => {}
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }

        info!(queue = %self.queue_name, "Queue consumer stopped");
    }
}
