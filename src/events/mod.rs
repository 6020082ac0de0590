//! # Transition Events
//!
//! Every write the executor persists is also published here so in-process
//! observers (tests, metrics exporters, audit sinks) can follow task history.

pub mod publisher;

pub use publisher::{EventPublisher, TransitionEvent};
