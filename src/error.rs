use thiserror::Error;

use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use crate::state_machine::StateMachineError;
use crate::store::StoreError;

/// Crate-level error joining the per-layer error types
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("State machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
