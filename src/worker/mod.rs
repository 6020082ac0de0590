//! # Worker Runtime
//!
//! Broker-facing side of the system: queue consumers that drive the
//! executors, the scheduler that creates and enqueues tasks, and the poller
//! that re-enqueues tasks parked in wait states.

pub mod consumer;
pub mod poller;
pub mod scheduler;

pub use consumer::{MessageDisposition, QueueConsumer};
pub use poller::WaitStatePoller;
pub use scheduler::TaskScheduler;
