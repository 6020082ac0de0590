//! # State Machine Core
//!
//! Closed per-kind state sets, static transition tables, the handler
//! contract and the executor that drives records through them.

pub mod errors;
pub mod executor;
pub mod handler;
pub mod outcome;
pub mod registry;
pub mod retry;
pub mod states;
pub mod table;

pub use errors::{StateMachineError, StateMachineResult};
pub use executor::{AdvanceOutcome, AdvanceReport, TaskExecutor};
pub use handler::{TaskSnapshot, TransitionHandler};
pub use outcome::HandlerOutcome;
pub use registry::{ExecutorRegistry, TaskAdvancer};
pub use retry::RetryPolicy;
pub use states::{StateMode, WorkflowState};
pub use table::TransitionTable;
