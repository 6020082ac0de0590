//! # Messaging
//!
//! Task-id envelopes and the broker abstraction they travel through.
//! Delivery is at-least-once; a message is acknowledged only after the
//! executor has persisted the task's new state.

pub mod errors;
pub mod message;
pub mod service;

pub use errors::{MessagingError, MessagingResult};
pub use message::TaskMessage;
pub use service::{
    InMemoryMessagingService, MessageId, MessagingProvider, MessagingService,
    PgmqMessagingService, QueueHealthReport, QueueMessage, QueueStats, QueuedMessage,
    ReceiptHandle,
};
