//! # Data Models
//!
//! Task records, identifiers and payload deltas shared by the executor,
//! stores and transition handlers.

pub mod identifiers;
pub mod payload;
pub mod task;

pub use identifiers::{TaskId, TaskKind};
pub use payload::PayloadDelta;
pub use task::{NewTask, TaskRecord};
