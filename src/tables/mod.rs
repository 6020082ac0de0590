//! # Transition Tables
//!
//! The three concrete tables: recommendation checklist runs, scheduled
//! reports and ephemeral infrastructure jobs. Each declares its closed
//! state set, the collaborator trait its handlers call, and the table
//! object mapping every state to its handler.

pub mod checklist;
pub mod infra;
pub mod report;

pub use checklist::{ChecklistBackend, ChecklistState, ChecklistTable};
pub use infra::{InfraBackend, InfraState, InfraTable};
pub use report::{ReportBackend, ReportState, ReportTable};

use crate::constants::CANCELLED_DETAIL;
use crate::state_machine::HandlerOutcome;

pub(crate) fn cancelled<S>() -> HandlerOutcome<S> {
    HandlerOutcome::permanent(CANCELLED_DETAIL)
}

pub(crate) fn missing_field<S>(field: &str) -> HandlerOutcome<S> {
    HandlerOutcome::permanent(format!("invalid payload: missing {field}"))
}
