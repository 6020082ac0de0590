//! # Report Table
//!
//! One scheduled report generation and delivery. All states self-advance,
//! so a healthy task runs from `created` to `completed` in a single
//! `advance` call.
//!
//! ```text
//! created -> started -> getting_scopes -> getting_recipients
//!         -> generating_data -> putting_to_herald -> completed
//! ```
//!
//! An empty scope or recipient list completes the task early.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use super::{cancelled, missing_field};
use crate::collaborators::CollaboratorResult;
use crate::models::{PayloadDelta, TaskKind};
use crate::state_machine::{HandlerOutcome, TaskSnapshot, TransitionHandler, TransitionTable};

pub const SCHEDULE_ID: &str = "schedule_id";
pub const REPORT_ID: &str = "report_id";
pub const SCOPES: &str = "scopes";
pub const RECIPIENTS: &str = "recipients";
pub const REPORT_DATA: &str = "report_data";

crate::workflow_states! {
    pub enum ReportState {
        initial = Created,
        error = Error,
        states {
            Created => ("created", SelfAdvancing),
            Started => ("started", SelfAdvancing),
            GettingScopes => ("getting_scopes", SelfAdvancing),
            GettingRecipients => ("getting_recipients", SelfAdvancing),
            GeneratingData => ("generating_data", SelfAdvancing),
            PuttingToHerald => ("putting_to_herald", SelfAdvancing),
            Completed => ("completed", Terminal),
            Error => ("error", Terminal),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSchedule {
    pub id: String,
    pub report_id: String,
    pub organization_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub employee_id: String,
    pub email: String,
    pub scope_id: String,
}

/// Generated report for one recipient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDocument {
    pub recipient: Recipient,
    pub data: Value,
}

/// REST and delivery calls made by the report handlers
#[async_trait]
pub trait ReportBackend: Send + Sync + 'static {
    /// `NotFound` when the schedule was deleted
    async fn find_schedule(&self, schedule_id: &str) -> CollaboratorResult<ReportSchedule>;

    /// Stamp the schedule's last run; repeating it is harmless
    async fn mark_run_started(&self, schedule_id: &str) -> CollaboratorResult<()>;

    async fn get_scopes(&self, schedule_id: &str) -> CollaboratorResult<Vec<String>>;

    async fn get_recipients(
        &self,
        schedule_id: &str,
        scopes: &[String],
    ) -> CollaboratorResult<Vec<Recipient>>;

    async fn generate_data(&self, report_id: &str, recipient: &Recipient) -> CollaboratorResult<Value>;

    /// Hand one document to herald; `idempotency_key` dedupes redelivered sends
    async fn deliver(&self, idempotency_key: &str, document: &ReportDocument) -> CollaboratorResult<()>;
}

pub struct LoadSchedule {
    backend: Arc<dyn ReportBackend>,
}

#[async_trait]
impl TransitionHandler<ReportState> for LoadSchedule {
    fn name(&self) -> &'static str {
        "load_report_schedule"
    }

    async fn handle(&self, task: &TaskSnapshot<ReportState>) -> HandlerOutcome<ReportState> {
        if task.should_stop() {
            return cancelled();
        }
        let Some(schedule_id) = task.payload_str(SCHEDULE_ID) else {
            return missing_field(SCHEDULE_ID);
        };

        match self.backend.find_schedule(schedule_id).await {
            Ok(schedule) => HandlerOutcome::advance_with(
                ReportState::Started,
                PayloadDelta::new()
                    .with(REPORT_ID, schedule.report_id)
                    .with("organization_id", schedule.organization_id),
            ),
            Err(e) => e.into_outcome(),
        }
    }
}

pub struct MarkRunStarted {
    backend: Arc<dyn ReportBackend>,
}

#[async_trait]
impl TransitionHandler<ReportState> for MarkRunStarted {
    fn name(&self) -> &'static str {
        "mark_report_run_started"
    }

    async fn handle(&self, task: &TaskSnapshot<ReportState>) -> HandlerOutcome<ReportState> {
        if task.should_stop() {
            return cancelled();
        }
        let Some(schedule_id) = task.payload_str(SCHEDULE_ID) else {
            return missing_field(SCHEDULE_ID);
        };

        match self.backend.mark_run_started(schedule_id).await {
            Ok(()) => HandlerOutcome::advance_with(
                ReportState::GettingScopes,
                PayloadDelta::new().with("run_started_at", Utc::now().to_rfc3339()),
            ),
            Err(e) => e.into_outcome(),
        }
    }
}

pub struct GetScopes {
    backend: Arc<dyn ReportBackend>,
}

#[async_trait]
impl TransitionHandler<ReportState> for GetScopes {
    fn name(&self) -> &'static str {
        "get_report_scopes"
    }

    async fn handle(&self, task: &TaskSnapshot<ReportState>) -> HandlerOutcome<ReportState> {
        if task.should_stop() {
            return cancelled();
        }
        let Some(schedule_id) = task.payload_str(SCHEDULE_ID) else {
            return missing_field(SCHEDULE_ID);
        };

        match self.backend.get_scopes(schedule_id).await {
            Ok(scopes) if scopes.is_empty() => {
                info!(task_id = %task.task_id(), "No report scopes; completing early");
                HandlerOutcome::advance_with(
                    ReportState::Completed,
                    PayloadDelta::new().with(SCOPES, Vec::<String>::new()),
                )
            }
            Ok(scopes) => HandlerOutcome::advance_with(
                ReportState::GettingRecipients,
                PayloadDelta::new().with(SCOPES, scopes),
            ),
            Err(e) => e.into_outcome(),
        }
    }
}

pub struct GetRecipients {
    backend: Arc<dyn ReportBackend>,
}

#[async_trait]
impl TransitionHandler<ReportState> for GetRecipients {
    fn name(&self) -> &'static str {
        "get_report_recipients"
    }

    async fn handle(&self, task: &TaskSnapshot<ReportState>) -> HandlerOutcome<ReportState> {
        if task.should_stop() {
            return cancelled();
        }
        let Some(schedule_id) = task.payload_str(SCHEDULE_ID) else {
            return missing_field(SCHEDULE_ID);
        };
        let Some(scopes) = task.payload_field::<Vec<String>>(SCOPES) else {
            return missing_field(SCOPES);
        };

        match self.backend.get_recipients(schedule_id, &scopes).await {
            Ok(recipients) if recipients.is_empty() => {
                info!(task_id = %task.task_id(), "No report recipients; completing early");
                HandlerOutcome::advance_with(
                    ReportState::Completed,
                    PayloadDelta::new().with(RECIPIENTS, Vec::<Value>::new()),
                )
            }
            Ok(recipients) => match serde_json::to_value(&recipients) {
                Ok(value) => HandlerOutcome::advance_with(
                    ReportState::GeneratingData,
                    PayloadDelta::new().with(RECIPIENTS, value),
                ),
                Err(e) => HandlerOutcome::permanent(format!("unencodable recipients: {e}")),
            },
            Err(e) => e.into_outcome(),
        }
    }
}

pub struct GenerateData {
    backend: Arc<dyn ReportBackend>,
}

#[async_trait]
impl TransitionHandler<ReportState> for GenerateData {
    fn name(&self) -> &'static str {
        "generate_report_data"
    }

    async fn handle(&self, task: &TaskSnapshot<ReportState>) -> HandlerOutcome<ReportState> {
        if task.should_stop() {
            return cancelled();
        }
        let Some(report_id) = task.payload_str(REPORT_ID) else {
            return missing_field(REPORT_ID);
        };
        let Some(recipients) = task.payload_field::<Vec<Recipient>>(RECIPIENTS) else {
            return missing_field(RECIPIENTS);
        };

        let mut documents = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            match self.backend.generate_data(report_id, &recipient).await {
                Ok(data) => documents.push(ReportDocument { recipient, data }),
                Err(e) => return e.into_outcome(),
            }
        }
        debug!(task_id = %task.task_id(), documents = documents.len(), "Report data generated");

        match serde_json::to_value(&documents) {
            Ok(value) => HandlerOutcome::advance_with(
                ReportState::PuttingToHerald,
                PayloadDelta::new().with(REPORT_DATA, value),
            ),
            Err(e) => HandlerOutcome::permanent(format!("unencodable report data: {e}")),
        }
    }
}

pub struct PutToHerald {
    backend: Arc<dyn ReportBackend>,
}

#[async_trait]
impl TransitionHandler<ReportState> for PutToHerald {
    fn name(&self) -> &'static str {
        "put_report_to_herald"
    }

    async fn handle(&self, task: &TaskSnapshot<ReportState>) -> HandlerOutcome<ReportState> {
        if task.should_stop() {
            return cancelled();
        }
        let Some(documents) = task.payload_field::<Vec<ReportDocument>>(REPORT_DATA) else {
            return missing_field(REPORT_DATA);
        };

        for document in &documents {
            let key = format!("{}:{}", task.task_id(), document.recipient.employee_id);
            if let Err(e) = self.backend.deliver(&key, document).await {
                return e.into_outcome();
            }
        }

        // Generated data is not kept once delivered
        HandlerOutcome::advance_with(
            ReportState::Completed,
            PayloadDelta::new()
                .without(REPORT_DATA)
                .with("delivered_count", documents.len())
                .with("completed_at", Utc::now().to_rfc3339()),
        )
    }
}

pub struct ReportTable {
    load_schedule: LoadSchedule,
    mark_started: MarkRunStarted,
    get_scopes: GetScopes,
    get_recipients: GetRecipients,
    generate_data: GenerateData,
    put_to_herald: PutToHerald,
}

impl ReportTable {
    pub fn new(backend: Arc<dyn ReportBackend>) -> Self {
        Self {
            load_schedule: LoadSchedule {
                backend: backend.clone(),
            },
            mark_started: MarkRunStarted {
                backend: backend.clone(),
            },
            get_scopes: GetScopes {
                backend: backend.clone(),
            },
            get_recipients: GetRecipients {
                backend: backend.clone(),
            },
            generate_data: GenerateData {
                backend: backend.clone(),
            },
            put_to_herald: PutToHerald { backend },
        }
    }
}

impl TransitionTable for ReportTable {
    type State = ReportState;

    fn kind(&self) -> TaskKind {
        TaskKind::Report
    }

    fn handler_for(&self, state: ReportState) -> Option<&dyn TransitionHandler<ReportState>> {
        match state {
            ReportState::Created => Some(&self.load_schedule),
            ReportState::Started => Some(&self.mark_started),
            ReportState::GettingScopes => Some(&self.get_scopes),
            ReportState::GettingRecipients => Some(&self.get_recipients),
            ReportState::GeneratingData => Some(&self.generate_data),
            ReportState::PuttingToHerald => Some(&self.put_to_herald),
            ReportState::Completed | ReportState::Error => None,
        }
    }
}
