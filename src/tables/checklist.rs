//! # Checklist Table
//!
//! One recommendation-checklist run for an organization:
//!
//! ```text
//! created -> started -> working (wait) -> waited_checklist -> completed
//!                                                             error
//! ```
//!
//! Payload contract: `organization_id` is set by the scheduler; handlers add
//! `checklist_id`, `run_id`, `run_started_at` and `completed_at`.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::{cancelled, missing_field};
use crate::collaborators::CollaboratorResult;
use crate::constants::DEFAULT_CHECKLIST_RUN_TIMEOUT_SECONDS;
use crate::models::{PayloadDelta, TaskKind};
use crate::state_machine::{HandlerOutcome, TaskSnapshot, TransitionHandler, TransitionTable};

pub const ORGANIZATION_ID: &str = "organization_id";
pub const CHECKLIST_ID: &str = "checklist_id";
pub const RUN_ID: &str = "run_id";

crate::workflow_states! {
    pub enum ChecklistState {
        initial = Created,
        error = Error,
        states {
            Created => ("created", SelfAdvancing),
            Started => ("started", SelfAdvancing),
            Working => ("working", Wait),
            WaitedChecklist => ("waited_checklist", SelfAdvancing),
            Completed => ("completed", Terminal),
            Error => ("error", Terminal),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checklist {
    pub id: String,
    pub organization_id: String,
}

/// Progress of a checklist run as reported by the REST API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed { reason: String },
}

/// REST calls made by the checklist handlers
#[async_trait]
pub trait ChecklistBackend: Send + Sync + 'static {
    /// `NotFound` when the organization has no checklist
    async fn find_checklist(&self, organization_id: &str) -> CollaboratorResult<Checklist>;

    /// Start a run and return its id
    async fn begin_run(&self, checklist_id: &str) -> CollaboratorResult<String>;

    async fn run_status(&self, checklist_id: &str, run_id: &str) -> CollaboratorResult<RunStatus>;

    /// Record the run as the checklist's latest completed one
    async fn complete_checklist(&self, checklist_id: &str, run_id: &str) -> CollaboratorResult<()>;
}

pub struct CheckChecklistExists {
    backend: Arc<dyn ChecklistBackend>,
}

#[async_trait]
impl TransitionHandler<ChecklistState> for CheckChecklistExists {
    fn name(&self) -> &'static str {
        "check_checklist_exists"
    }

    async fn handle(&self, task: &TaskSnapshot<ChecklistState>) -> HandlerOutcome<ChecklistState> {
        if task.should_stop() {
            return cancelled();
        }
        let Some(organization_id) = task.payload_str(ORGANIZATION_ID) else {
            return missing_field(ORGANIZATION_ID);
        };

        match self.backend.find_checklist(organization_id).await {
            Ok(checklist) => HandlerOutcome::advance_with(
                ChecklistState::Started,
                PayloadDelta::new().with(CHECKLIST_ID, checklist.id),
            ),
            Err(e) => e.into_outcome(),
        }
    }
}

pub struct BeginChecklistRun {
    backend: Arc<dyn ChecklistBackend>,
}

#[async_trait]
impl TransitionHandler<ChecklistState> for BeginChecklistRun {
    fn name(&self) -> &'static str {
        "begin_checklist_run"
    }

    async fn handle(&self, task: &TaskSnapshot<ChecklistState>) -> HandlerOutcome<ChecklistState> {
        if task.should_stop() {
            return cancelled();
        }
        // Run already started by an earlier delivery
        if task.payload_str(RUN_ID).is_some() {
            debug!(task_id = %task.task_id(), "Checklist run already started");
            return HandlerOutcome::advance_to(ChecklistState::Working);
        }
        let Some(checklist_id) = task.payload_str(CHECKLIST_ID) else {
            return missing_field(CHECKLIST_ID);
        };

        match self.backend.begin_run(checklist_id).await {
            Ok(run_id) => HandlerOutcome::advance_with(
                ChecklistState::Working,
                PayloadDelta::new()
                    .with(RUN_ID, run_id)
                    .with("run_started_at", Utc::now().to_rfc3339()),
            ),
            Err(e) => e.into_outcome(),
        }
    }
}

pub struct PollChecklistRun {
    backend: Arc<dyn ChecklistBackend>,
    run_timeout: ChronoDuration,
}

#[async_trait]
impl TransitionHandler<ChecklistState> for PollChecklistRun {
    fn name(&self) -> &'static str {
        "poll_checklist_run"
    }

    async fn handle(&self, task: &TaskSnapshot<ChecklistState>) -> HandlerOutcome<ChecklistState> {
        if task.should_stop() {
            return cancelled();
        }
        let (Some(checklist_id), Some(run_id)) =
            (task.payload_str(CHECKLIST_ID), task.payload_str(RUN_ID))
        else {
            return missing_field(RUN_ID);
        };

        match self.backend.run_status(checklist_id, run_id).await {
            Ok(RunStatus::Succeeded) => HandlerOutcome::advance_to(ChecklistState::WaitedChecklist),
            Ok(RunStatus::Failed { reason }) => {
                HandlerOutcome::permanent(format!("checklist run {run_id} failed: {reason}"))
            }
            Ok(RunStatus::Running) if task.time_in_state() > self.run_timeout => {
                HandlerOutcome::permanent(format!(
                    "checklist run {run_id} did not finish within {}s",
                    self.run_timeout.num_seconds()
                ))
            }
            Ok(RunStatus::Running) => HandlerOutcome::still_waiting(format!("run {run_id} running")),
            Err(e) => e.into_outcome(),
        }
    }
}

pub struct CompleteChecklist {
    backend: Arc<dyn ChecklistBackend>,
}

#[async_trait]
impl TransitionHandler<ChecklistState> for CompleteChecklist {
    fn name(&self) -> &'static str {
        "complete_checklist"
    }

    async fn handle(&self, task: &TaskSnapshot<ChecklistState>) -> HandlerOutcome<ChecklistState> {
        let (Some(checklist_id), Some(run_id)) =
            (task.payload_str(CHECKLIST_ID), task.payload_str(RUN_ID))
        else {
            return missing_field(RUN_ID);
        };

        match self.backend.complete_checklist(checklist_id, run_id).await {
            Ok(()) => HandlerOutcome::advance_with(
                ChecklistState::Completed,
                PayloadDelta::new().with("completed_at", Utc::now().to_rfc3339()),
            ),
            Err(e) => e.into_outcome(),
        }
    }
}

pub struct ChecklistTable {
    check_exists: CheckChecklistExists,
    begin_run: BeginChecklistRun,
    poll_run: PollChecklistRun,
    complete: CompleteChecklist,
}

impl ChecklistTable {
    pub fn new(backend: Arc<dyn ChecklistBackend>) -> Self {
        Self {
            check_exists: CheckChecklistExists {
                backend: backend.clone(),
            },
            begin_run: BeginChecklistRun {
                backend: backend.clone(),
            },
            poll_run: PollChecklistRun {
                backend: backend.clone(),
                run_timeout: ChronoDuration::seconds(DEFAULT_CHECKLIST_RUN_TIMEOUT_SECONDS),
            },
            complete: CompleteChecklist { backend },
        }
    }

    /// Longest a run may stay in `working`
    pub fn with_run_timeout(mut self, run_timeout: ChronoDuration) -> Self {
        self.poll_run.run_timeout = run_timeout;
        self
    }
}

impl TransitionTable for ChecklistTable {
    type State = ChecklistState;

    fn kind(&self) -> TaskKind {
        TaskKind::Checklist
    }

    fn handler_for(&self, state: ChecklistState) -> Option<&dyn TransitionHandler<ChecklistState>> {
        match state {
            ChecklistState::Created => Some(&self.check_exists),
            ChecklistState::Started => Some(&self.begin_run),
            ChecklistState::Working => Some(&self.poll_run),
            ChecklistState::WaitedChecklist => Some(&self.complete),
            ChecklistState::Completed | ChecklistState::Error => None,
        }
    }
}
