use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::constants::{events, DEFAULT_EVENT_CHANNEL_CAPACITY};
use crate::models::{TaskId, TaskKind};

/// Broadcast sink for persisted transitions
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<TransitionEvent>,
}

/// One persisted write made by the executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub name: String,
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub from_state: String,
    pub to_state: String,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl TransitionEvent {
    pub fn new(
        task_id: TaskId,
        kind: TaskKind,
        from_state: impl Into<String>,
        to_state: impl Into<String>,
        duration_ms: u64,
        error: Option<String>,
    ) -> Self {
        let from_state = from_state.into();
        let to_state = to_state.into();
        // Same-state writes either record a failure or clear one
        let name = match (from_state == to_state, &error) {
            (true, Some(_)) => events::TASK_RETRY_SCHEDULED,
            (true, None) => events::TASK_RECOVERED,
            (false, _) => events::TASK_TRANSITIONED,
        };
        Self {
            name: name.to_string(),
            task_id,
            kind,
            from_state,
            to_state,
            duration_ms,
            error,
            occurred_at: Utc::now(),
        }
    }

    /// Rename the event for a terminal write
    pub fn terminal(mut self, failed: bool) -> Self {
        self.name = if failed {
            events::TASK_FAILED
        } else {
            events::TASK_COMPLETED
        }
        .to_string();
        self
    }
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(&self, event: TransitionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransitionEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let publisher = EventPublisher::default();
        publisher.publish(TransitionEvent::new(
            TaskId::new(),
            TaskKind::Checklist,
            "created",
            "started",
            1,
            None,
        ));
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let publisher = EventPublisher::new(8);
        let mut rx = publisher.subscribe();
        let id = TaskId::new();

        publisher.publish(TransitionEvent::new(id, TaskKind::Infra, "started", "started", 5, Some("timeout".into())));
        publisher.publish(TransitionEvent::new(id, TaskKind::Infra, "destroying", "destroyed", 2, None).terminal(false));

        let retry = rx.recv().await.unwrap();
        assert_eq!(retry.name, events::TASK_RETRY_SCHEDULED);
        assert_eq!(retry.error.as_deref(), Some("timeout"));

        let done = rx.recv().await.unwrap();
        assert_eq!(done.name, events::TASK_COMPLETED);
        assert_eq!(done.to_state, "destroyed");
    }

    #[test]
    fn test_same_state_write_without_error_is_a_recovery() {
        let event = TransitionEvent::new(TaskId::new(), TaskKind::Checklist, "working", "working", 3, None);
        assert_eq!(event.name, events::TASK_RECOVERED);
    }
}
