use thiserror::Error;

use crate::state_machine::{HandlerOutcome, WorkflowState};

/// Failure of a call to a sibling service made from inside a handler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("{service} unavailable: {message}")]
    Unavailable { service: String, message: String },

    #[error("{service} request timed out")]
    Timeout { service: String },

    #[error("{service} rate limited the request")]
    RateLimited { service: String },

    #[error("dependency not found: {resource}")]
    NotFound { resource: String },

    #[error("{service} rejected the request: {message}")]
    Rejected { service: String, message: String },
}

impl CollaboratorError {
    pub fn unavailable(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn timeout(service: impl Into<String>) -> Self {
        Self::Timeout {
            service: service.into(),
        }
    }

    pub fn rate_limited(service: impl Into<String>) -> Self {
        Self::RateLimited {
            service: service.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn rejected(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Whether retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable { .. } | Self::Timeout { .. } | Self::RateLimited { .. }
        )
    }

    /// Handler outcome for a call that failed with this error
    pub fn into_outcome<S: WorkflowState>(self) -> HandlerOutcome<S> {
        if self.is_transient() {
            HandlerOutcome::transient(self.to_string())
        } else {
            HandlerOutcome::permanent(self.to_string())
        }
    }
}

pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    crate::workflow_states! {
        enum Sample {
            initial = Created,
            error = Error,
            states {
                Created => ("created", SelfAdvancing),
                Completed => ("completed", Terminal),
                Error => ("error", Terminal),
            }
        }
    }

    #[test]
    fn test_classification() {
        assert!(CollaboratorError::timeout("rest_api").is_transient());
        assert!(CollaboratorError::rate_limited("herald").is_transient());
        assert!(CollaboratorError::unavailable("rest_api", "connection refused").is_transient());
        assert!(!CollaboratorError::not_found("checklist").is_transient());
        assert!(!CollaboratorError::rejected("rest_api", "bad payload").is_transient());
    }

    #[test]
    fn test_not_found_maps_to_permanent_dependency_failure() {
        let outcome: HandlerOutcome<Sample> =
            CollaboratorError::not_found("checklist for organization org-1").into_outcome();
        match outcome {
            HandlerOutcome::PermanentFailure { detail } => {
                assert!(detail.starts_with("dependency not found"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
