use serde::{Deserialize, Serialize};

use crate::models::PayloadDelta;

/// Result of one handler invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HandlerOutcome<S> {
    /// Move to `next_state`, merging `payload_delta` into the payload
    Success {
        next_state: S,
        payload_delta: Option<PayloadDelta>,
    },
    /// External work still running; only valid in a wait state
    StillWaiting { detail: String },
    /// Retry the same state later
    TransientFailure { detail: String },
    /// Move to the error state without retry
    PermanentFailure { detail: String },
}

impl<S> HandlerOutcome<S> {
    pub fn advance_to(next_state: S) -> Self {
        Self::Success {
            next_state,
            payload_delta: None,
        }
    }

    pub fn advance_with(next_state: S, payload_delta: PayloadDelta) -> Self {
        Self::Success {
            next_state,
            payload_delta: Some(payload_delta),
        }
    }

    pub fn still_waiting(detail: impl Into<String>) -> Self {
        Self::StillWaiting {
            detail: detail.into(),
        }
    }

    pub fn transient(detail: impl Into<String>) -> Self {
        Self::TransientFailure {
            detail: detail.into(),
        }
    }

    pub fn permanent(detail: impl Into<String>) -> Self {
        Self::PermanentFailure {
            detail: detail.into(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::StillWaiting { .. } => "still_waiting",
            Self::TransientFailure { .. } => "transient_failure",
            Self::PermanentFailure { .. } => "permanent_failure",
        }
    }
}
