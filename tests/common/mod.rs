//! Shared fixtures for the integration suites: scripted collaborator
//! backends and a worker config with fast retries.

#![allow(dead_code)]

pub mod strategies;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fsm_worker::bootstrap::TableBackends;
use fsm_worker::collaborators::{CollaboratorError, CollaboratorResult};
use fsm_worker::config::WorkerConfig;
use fsm_worker::state_machine::RetryPolicy;
use fsm_worker::tables::checklist::{Checklist, ChecklistBackend, RunStatus};
use fsm_worker::tables::infra::{InfraBackend, InstancesStatus, Runset};
use fsm_worker::tables::report::{Recipient, ReportBackend, ReportDocument, ReportSchedule};

/// Organization whose checklist was deleted
pub const DELETED_ORGANIZATION: &str = "org-deleted";
/// Schedule whose lookup blocks briefly, to force interleaving
pub const SLOW_SCHEDULE: &str = "schedule-slow";

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay_ms: 10,
        max_delay_ms: 100,
        backoff_multiplier: 2.0,
    }
}

pub fn test_config() -> WorkerConfig {
    let mut config = WorkerConfig::default();
    config.retry.checklist = fast_retry(5);
    config.retry.report = fast_retry(3);
    config.retry.infra = fast_retry(3);
    config.executor.handler_timeout_ms = 2_000;
    config.consumer.max_receive_count = 2;
    config.consumer.poll_interval_ms = 10;
    config.poller.recheck_interval_seconds = 0;
    config
}

fn pop_or<T: Clone>(queue: &Mutex<VecDeque<T>>, fallback: T) -> T {
    queue.lock().unwrap().pop_front().unwrap_or(fallback)
}

/// Checklist collaborator with scripted failures and run statuses
#[derive(Default)]
pub struct ScriptedChecklist {
    pub begin_failures: Mutex<VecDeque<CollaboratorError>>,
    pub run_statuses: Mutex<VecDeque<CollaboratorResult<RunStatus>>>,
    pub begin_calls: AtomicU32,
    pub completed: Mutex<Vec<String>>,
}

impl ScriptedChecklist {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_begin(&self, errors: impl IntoIterator<Item = CollaboratorError>) {
        self.begin_failures.lock().unwrap().extend(errors);
    }

    pub fn push_status(&self, status: RunStatus) {
        self.run_statuses.lock().unwrap().push_back(Ok(status));
    }

    /// Queue a failed status lookup
    pub fn fail_status(&self, error: CollaboratorError) {
        self.run_statuses.lock().unwrap().push_back(Err(error));
    }

    pub fn begin_calls(&self) -> u32 {
        self.begin_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChecklistBackend for ScriptedChecklist {
    async fn find_checklist(&self, organization_id: &str) -> CollaboratorResult<Checklist> {
        if organization_id == DELETED_ORGANIZATION {
            return Err(CollaboratorError::not_found(format!(
                "checklist for organization {organization_id}"
            )));
        }
        Ok(Checklist {
            id: format!("checklist-{organization_id}"),
            organization_id: organization_id.to_string(),
        })
    }

    async fn begin_run(&self, checklist_id: &str) -> CollaboratorResult<String> {
        let call = self.begin_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(error) = self.begin_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(format!("{checklist_id}-run-{call}"))
    }

    async fn run_status(&self, _checklist_id: &str, _run_id: &str) -> CollaboratorResult<RunStatus> {
        pop_or(&self.run_statuses, Ok(RunStatus::Running))
    }

    async fn complete_checklist(&self, checklist_id: &str, _run_id: &str) -> CollaboratorResult<()> {
        self.completed.lock().unwrap().push(checklist_id.to_string());
        Ok(())
    }
}

/// Report collaborator recording every delivery
pub struct ScriptedReport {
    pub scopes: Mutex<Vec<String>>,
    pub recipients: Mutex<Vec<Recipient>>,
    pub delivered: Mutex<Vec<String>>,
    pub schedule_lookups: AtomicU32,
}

impl ScriptedReport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scopes: Mutex::new(vec!["pool-1".to_string()]),
            recipients: Mutex::new(vec![
                recipient("emp-1", "pool-1"),
                recipient("emp-2", "pool-1"),
            ]),
            delivered: Mutex::new(Vec::new()),
            schedule_lookups: AtomicU32::new(0),
        })
    }

    pub fn set_scopes(&self, scopes: Vec<String>) {
        *self.scopes.lock().unwrap() = scopes;
    }

    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

pub fn recipient(employee_id: &str, scope_id: &str) -> Recipient {
    Recipient {
        employee_id: employee_id.to_string(),
        email: format!("{employee_id}@example.com"),
        scope_id: scope_id.to_string(),
    }
}

#[async_trait]
impl ReportBackend for ScriptedReport {
    async fn find_schedule(&self, schedule_id: &str) -> CollaboratorResult<ReportSchedule> {
        self.schedule_lookups.fetch_add(1, Ordering::SeqCst);
        if schedule_id == SLOW_SCHEDULE {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Ok(ReportSchedule {
            id: schedule_id.to_string(),
            report_id: format!("report-{schedule_id}"),
            organization_id: "org-1".to_string(),
        })
    }

    async fn mark_run_started(&self, _schedule_id: &str) -> CollaboratorResult<()> {
        Ok(())
    }

    async fn get_scopes(&self, _schedule_id: &str) -> CollaboratorResult<Vec<String>> {
        Ok(self.scopes.lock().unwrap().clone())
    }

    async fn get_recipients(
        &self,
        _schedule_id: &str,
        _scopes: &[String],
    ) -> CollaboratorResult<Vec<Recipient>> {
        Ok(self.recipients.lock().unwrap().clone())
    }

    async fn generate_data(&self, report_id: &str, recipient: &Recipient) -> CollaboratorResult<Value> {
        Ok(serde_json::json!({"report_id": report_id, "scope_id": recipient.scope_id}))
    }

    async fn deliver(&self, idempotency_key: &str, _document: &ReportDocument) -> CollaboratorResult<()> {
        self.delivered.lock().unwrap().push(idempotency_key.to_string());
        Ok(())
    }
}

/// Infra collaborator with scripted instance and run progress
pub struct ScriptedInfra {
    pub instance_statuses: Mutex<VecDeque<InstancesStatus>>,
    pub status_failures: Mutex<VecDeque<CollaboratorError>>,
    pub runs_finished: Mutex<bool>,
    pub runs_check_failures: Mutex<VecDeque<CollaboratorError>>,
    pub destroyed: Mutex<HashSet<String>>,
    pub destroy_reasons: Mutex<Vec<String>>,
}

impl ScriptedInfra {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            instance_statuses: Mutex::new(VecDeque::new()),
            status_failures: Mutex::new(VecDeque::new()),
            runs_finished: Mutex::new(false),
            runs_check_failures: Mutex::new(VecDeque::new()),
            destroyed: Mutex::new(HashSet::new()),
            destroy_reasons: Mutex::new(Vec::new()),
        })
    }

    pub fn push_status(&self, status: InstancesStatus) {
        self.instance_statuses.lock().unwrap().push_back(status);
    }

    pub fn fail_status(&self, errors: impl IntoIterator<Item = CollaboratorError>) {
        self.status_failures.lock().unwrap().extend(errors);
    }

    pub fn fail_runs_check(&self, errors: impl IntoIterator<Item = CollaboratorError>) {
        self.runs_check_failures.lock().unwrap().extend(errors);
    }

    pub fn destroy_reasons(&self) -> Vec<String> {
        self.destroy_reasons.lock().unwrap().clone()
    }

    pub fn finish_runs(&self) {
        *self.runs_finished.lock().unwrap() = true;
    }

    pub fn destroyed_count(&self) -> usize {
        self.destroyed.lock().unwrap().len()
    }
}

#[async_trait]
impl InfraBackend for ScriptedInfra {
    async fn find_runset(&self, runset_id: &str) -> CollaboratorResult<Runset> {
        Ok(Runset {
            id: runset_id.to_string(),
            runner_count: 2,
            max_duration_seconds: None,
        })
    }

    async fn prepare_runners(&self, runset_id: &str) -> CollaboratorResult<Vec<String>> {
        Ok(vec![format!("{runset_id}-runner-1"), format!("{runset_id}-runner-2")])
    }

    async fn start_instances(
        &self,
        _runset_id: &str,
        runner_ids: &[String],
    ) -> CollaboratorResult<Vec<String>> {
        Ok(runner_ids.iter().map(|r| format!("i-{r}")).collect())
    }

    async fn instances_status(&self, _instance_ids: &[String]) -> CollaboratorResult<InstancesStatus> {
        if let Some(error) = self.status_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(pop_or(&self.instance_statuses, InstancesStatus::Pending))
    }

    async fn runs_finished(&self, _runset_id: &str) -> CollaboratorResult<bool> {
        if let Some(error) = self.runs_check_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(*self.runs_finished.lock().unwrap())
    }

    async fn prepare_destroy(&self, _runset_id: &str, reason: &str) -> CollaboratorResult<()> {
        self.destroy_reasons.lock().unwrap().push(reason.to_string());
        Ok(())
    }

    async fn destroy_instances(&self, instance_ids: &[String]) -> CollaboratorResult<()> {
        self.destroyed
            .lock()
            .unwrap()
            .extend(instance_ids.iter().cloned());
        Ok(())
    }
}

/// All three scripted backends plus the bundle the registry takes
pub struct Backends {
    pub checklist: Arc<ScriptedChecklist>,
    pub report: Arc<ScriptedReport>,
    pub infra: Arc<ScriptedInfra>,
}

impl Backends {
    pub fn new() -> Self {
        Self {
            checklist: ScriptedChecklist::new(),
            report: ScriptedReport::new(),
            infra: ScriptedInfra::new(),
        }
    }

    pub fn tables(&self) -> TableBackends {
        TableBackends {
            checklist: self.checklist.clone(),
            report: self.report.clone(),
            infra: self.infra.clone(),
        }
    }
}
