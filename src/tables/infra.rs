//! # Infra Table
//!
//! One ephemeral-infrastructure job (a runset): prepare runners, start
//! instances, wait for them and for the profiling agent (arcee) to report
//! the runs finished, then tear everything down.
//!
//! ```text
//! created -> starting_preparing -> starting -> started (wait)
//!         -> waiting_arcee (wait) -> destroy_preparing -> destroying -> destroyed
//! ```
//!
//! Once instances exist the task never fails straight to `error`: a
//! cancellation, a failed start, an exceeded run duration or a collaborator
//! that keeps failing diverts forward to `destroy_preparing` and records
//! `destroy_reason` instead. Only `destroying` itself can end in `error`.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{cancelled, missing_field};
use crate::collaborators::CollaboratorResult;
use crate::constants::DEFAULT_INFRA_START_TIMEOUT_SECONDS;
use crate::models::{PayloadDelta, TaskKind};
use crate::state_machine::{HandlerOutcome, TaskSnapshot, TransitionHandler, TransitionTable};

pub const RUNSET_ID: &str = "runset_id";
pub const RUNNER_IDS: &str = "runner_ids";
pub const INSTANCE_IDS: &str = "instance_ids";
pub const MAX_DURATION_SECONDS: &str = "max_duration_seconds";
pub const DESTROY_REASON: &str = "destroy_reason";

crate::workflow_states! {
    pub enum InfraState {
        initial = Created,
        error = Error,
        states {
            Created => ("created", SelfAdvancing),
            StartingPreparing => ("starting_preparing", SelfAdvancing),
            Starting => ("starting", SelfAdvancing),
            Started => ("started", Wait),
            WaitingArcee => ("waiting_arcee", Wait),
            DestroyPreparing => ("destroy_preparing", SelfAdvancing),
            Destroying => ("destroying", SelfAdvancing),
            Destroyed => ("destroyed", Terminal),
            Error => ("error", Terminal),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Runset {
    pub id: String,
    pub runner_count: u32,
    /// Destroy condition; `None` waits for arcee indefinitely
    pub max_duration_seconds: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InstancesStatus {
    Pending,
    Running,
    Failed { reason: String },
}

/// Provisioning calls made by the infra handlers
#[async_trait]
pub trait InfraBackend: Send + Sync + 'static {
    /// `NotFound` when the runset was deleted
    async fn find_runset(&self, runset_id: &str) -> CollaboratorResult<Runset>;

    /// Create runner records; returns the existing ones when already prepared
    async fn prepare_runners(&self, runset_id: &str) -> CollaboratorResult<Vec<String>>;

    /// Launch one instance per runner; returns instance ids. Runners that
    /// already have an instance return the existing one.
    async fn start_instances(
        &self,
        runset_id: &str,
        runner_ids: &[String],
    ) -> CollaboratorResult<Vec<String>>;

    async fn instances_status(&self, instance_ids: &[String]) -> CollaboratorResult<InstancesStatus>;

    /// Whether arcee reported every run of the runset finished
    async fn runs_finished(&self, runset_id: &str) -> CollaboratorResult<bool>;

    async fn prepare_destroy(&self, runset_id: &str, reason: &str) -> CollaboratorResult<()>;

    /// Terminate instances; already terminated ones are skipped
    async fn destroy_instances(&self, instance_ids: &[String]) -> CollaboratorResult<()>;
}

/// Instances recorded on the task, if any were started
fn instance_ids(task: &TaskSnapshot<InfraState>) -> Vec<String> {
    task.payload_field::<Vec<String>>(INSTANCE_IDS).unwrap_or_default()
}

fn divert_to_destroy(reason: impl Into<String>) -> HandlerOutcome<InfraState> {
    HandlerOutcome::advance_with(
        InfraState::DestroyPreparing,
        PayloadDelta::new().with(DESTROY_REASON, reason.into()),
    )
}

pub struct LoadRunset {
    backend: Arc<dyn InfraBackend>,
}

#[async_trait]
impl TransitionHandler<InfraState> for LoadRunset {
    fn name(&self) -> &'static str {
        "load_runset"
    }

    async fn handle(&self, task: &TaskSnapshot<InfraState>) -> HandlerOutcome<InfraState> {
        if task.should_stop() {
            return cancelled();
        }
        let Some(runset_id) = task.payload_str(RUNSET_ID) else {
            return missing_field(RUNSET_ID);
        };

        match self.backend.find_runset(runset_id).await {
            Ok(runset) if runset.runner_count == 0 => {
                HandlerOutcome::permanent(format!("runset {} has no runners", runset.id))
            }
            Ok(runset) => HandlerOutcome::advance_with(
                InfraState::StartingPreparing,
                PayloadDelta::new().with(MAX_DURATION_SECONDS, runset.max_duration_seconds),
            ),
            Err(e) => e.into_outcome(),
        }
    }
}

pub struct PrepareRunners {
    backend: Arc<dyn InfraBackend>,
}

#[async_trait]
impl TransitionHandler<InfraState> for PrepareRunners {
    fn name(&self) -> &'static str {
        "prepare_runners"
    }

    async fn handle(&self, task: &TaskSnapshot<InfraState>) -> HandlerOutcome<InfraState> {
        if task.should_stop() {
            return cancelled();
        }
        let Some(runset_id) = task.payload_str(RUNSET_ID) else {
            return missing_field(RUNSET_ID);
        };

        match self.backend.prepare_runners(runset_id).await {
            Ok(runner_ids) => HandlerOutcome::advance_with(
                InfraState::Starting,
                PayloadDelta::new().with(RUNNER_IDS, runner_ids),
            ),
            Err(e) => e.into_outcome(),
        }
    }
}

pub struct StartInstances {
    backend: Arc<dyn InfraBackend>,
}

#[async_trait]
impl TransitionHandler<InfraState> for StartInstances {
    fn name(&self) -> &'static str {
        "start_instances"
    }

    async fn handle(&self, task: &TaskSnapshot<InfraState>) -> HandlerOutcome<InfraState> {
        // No instances exist yet, so cancelling here fails the task
        if task.should_stop() {
            return cancelled();
        }
        let Some(runset_id) = task.payload_str(RUNSET_ID) else {
            return missing_field(RUNSET_ID);
        };
        let Some(runner_ids) = task.payload_field::<Vec<String>>(RUNNER_IDS) else {
            return missing_field(RUNNER_IDS);
        };

        match self.backend.start_instances(runset_id, &runner_ids).await {
            Ok(instance_ids) => {
                info!(task_id = %task.task_id(), instances = instance_ids.len(), "Instances starting");
                HandlerOutcome::advance_with(
                    InfraState::Started,
                    PayloadDelta::new()
                        .with(INSTANCE_IDS, instance_ids)
                        .with("instances_started_at", Utc::now().to_rfc3339()),
                )
            }
            Err(e) => e.into_outcome(),
        }
    }
}

pub struct AwaitInstances {
    backend: Arc<dyn InfraBackend>,
    start_timeout: ChronoDuration,
}

#[async_trait]
impl TransitionHandler<InfraState> for AwaitInstances {
    fn name(&self) -> &'static str {
        "await_instances"
    }

    async fn handle(&self, task: &TaskSnapshot<InfraState>) -> HandlerOutcome<InfraState> {
        if task.should_stop() {
            return divert_to_destroy("cancelled");
        }
        let instances = instance_ids(task);
        if instances.is_empty() {
            return missing_field(INSTANCE_IDS);
        }

        match self.backend.instances_status(&instances).await {
            Ok(InstancesStatus::Running) => HandlerOutcome::advance_to(InfraState::WaitingArcee),
            Ok(InstancesStatus::Failed { reason }) => {
                warn!(task_id = %task.task_id(), reason = %reason, "Instances failed to start");
                divert_to_destroy(format!("instances failed: {reason}"))
            }
            Ok(InstancesStatus::Pending) if task.time_in_state() > self.start_timeout => {
                divert_to_destroy(format!(
                    "instances not running after {}s",
                    self.start_timeout.num_seconds()
                ))
            }
            Ok(InstancesStatus::Pending) => HandlerOutcome::still_waiting("instances pending"),
            Err(e) if !e.is_transient() => divert_to_destroy(e.to_string()),
            Err(e) => e.into_outcome(),
        }
    }
}

pub struct AwaitArcee {
    backend: Arc<dyn InfraBackend>,
}

#[async_trait]
impl TransitionHandler<InfraState> for AwaitArcee {
    fn name(&self) -> &'static str {
        "await_arcee"
    }

    async fn handle(&self, task: &TaskSnapshot<InfraState>) -> HandlerOutcome<InfraState> {
        if task.should_stop() {
            return divert_to_destroy("cancelled");
        }
        let Some(runset_id) = task.payload_str(RUNSET_ID) else {
            return missing_field(RUNSET_ID);
        };

        match self.backend.runs_finished(runset_id).await {
            Ok(true) => divert_to_destroy("runs finished"),
            Ok(false) => {
                let max_duration = task.payload_field::<i64>(MAX_DURATION_SECONDS);
                match max_duration {
                    Some(max) if task.time_in_state() > ChronoDuration::seconds(max) => {
                        divert_to_destroy(format!("max duration of {max}s reached"))
                    }
                    _ => HandlerOutcome::still_waiting("runs in progress"),
                }
            }
            Err(e) if !e.is_transient() => divert_to_destroy(e.to_string()),
            Err(e) => e.into_outcome(),
        }
    }
}

pub struct PrepareDestroy {
    backend: Arc<dyn InfraBackend>,
}

#[async_trait]
impl TransitionHandler<InfraState> for PrepareDestroy {
    fn name(&self) -> &'static str {
        "prepare_destroy"
    }

    async fn handle(&self, task: &TaskSnapshot<InfraState>) -> HandlerOutcome<InfraState> {
        let Some(runset_id) = task.payload_str(RUNSET_ID) else {
            return missing_field(RUNSET_ID);
        };
        let reason = task.payload_str(DESTROY_REASON).unwrap_or("runs finished");

        match self.backend.prepare_destroy(runset_id, reason).await {
            Ok(()) => HandlerOutcome::advance_to(InfraState::Destroying),
            Err(e) if !e.is_transient() => {
                warn!(task_id = %task.task_id(), error = %e, "Destroy preparation rejected; destroying anyway");
                HandlerOutcome::advance_to(InfraState::Destroying)
            }
            Err(e) => e.into_outcome(),
        }
    }
}

pub struct DestroyInstances {
    backend: Arc<dyn InfraBackend>,
}

#[async_trait]
impl TransitionHandler<InfraState> for DestroyInstances {
    fn name(&self) -> &'static str {
        "destroy_instances"
    }

    async fn handle(&self, task: &TaskSnapshot<InfraState>) -> HandlerOutcome<InfraState> {
        let instances = instance_ids(task);
        match self.backend.destroy_instances(&instances).await {
            Ok(()) => HandlerOutcome::advance_with(
                InfraState::Destroyed,
                PayloadDelta::new().with("destroyed_at", Utc::now().to_rfc3339()),
            ),
            Err(e) => e.into_outcome(),
        }
    }
}

pub struct InfraTable {
    load_runset: LoadRunset,
    prepare_runners: PrepareRunners,
    start_instances: StartInstances,
    await_instances: AwaitInstances,
    await_arcee: AwaitArcee,
    prepare_destroy: PrepareDestroy,
    destroy_instances: DestroyInstances,
}

impl InfraTable {
    pub fn new(backend: Arc<dyn InfraBackend>) -> Self {
        Self {
            load_runset: LoadRunset {
                backend: backend.clone(),
            },
            prepare_runners: PrepareRunners {
                backend: backend.clone(),
            },
            start_instances: StartInstances {
                backend: backend.clone(),
            },
            await_instances: AwaitInstances {
                backend: backend.clone(),
                start_timeout: ChronoDuration::seconds(DEFAULT_INFRA_START_TIMEOUT_SECONDS),
            },
            await_arcee: AwaitArcee {
                backend: backend.clone(),
            },
            prepare_destroy: PrepareDestroy {
                backend: backend.clone(),
            },
            destroy_instances: DestroyInstances { backend },
        }
    }

    /// Longest instances may stay pending in `started`
    pub fn with_start_timeout(mut self, start_timeout: ChronoDuration) -> Self {
        self.await_instances.start_timeout = start_timeout;
        self
    }
}

impl TransitionTable for InfraTable {
    type State = InfraState;

    fn kind(&self) -> TaskKind {
        TaskKind::Infra
    }

    fn handler_for(&self, state: InfraState) -> Option<&dyn TransitionHandler<InfraState>> {
        match state {
            InfraState::Created => Some(&self.load_runset),
            InfraState::StartingPreparing => Some(&self.prepare_runners),
            InfraState::Starting => Some(&self.start_instances),
            InfraState::Started => Some(&self.await_instances),
            InfraState::WaitingArcee => Some(&self.await_arcee),
            InfraState::DestroyPreparing => Some(&self.prepare_destroy),
            InfraState::Destroying => Some(&self.destroy_instances),
            InfraState::Destroyed | InfraState::Error => None,
        }
    }

    fn on_retries_exhausted(&self, state: InfraState, detail: String) -> HandlerOutcome<InfraState> {
        match state {
            InfraState::Started | InfraState::WaitingArcee => {
                divert_to_destroy(format!("retries exhausted: {detail}"))
            }
            InfraState::DestroyPreparing => HandlerOutcome::advance_to(InfraState::Destroying),
            InfraState::Destroying => {
                error!(detail = %detail, "Instances could not be destroyed");
                HandlerOutcome::permanent(detail)
            }
            _ => HandlerOutcome::permanent(detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::CollaboratorError;
    use crate::state_machine::WorkflowState;

    #[test]
    fn test_wait_states() {
        assert_eq!(InfraState::wait_labels(), vec!["started", "waiting_arcee"]);
    }

    #[test]
    fn test_destroy_diversion_is_a_forward_edge() {
        assert!(InfraState::Started.can_advance_to(InfraState::DestroyPreparing));
        assert!(InfraState::WaitingArcee.can_advance_to(InfraState::DestroyPreparing));
        assert!(InfraState::Starting.can_advance_to(InfraState::DestroyPreparing));
        assert!(!InfraState::Destroying.can_advance_to(InfraState::DestroyPreparing));
    }

    struct Unreachable;

    #[async_trait]
    impl InfraBackend for Unreachable {
        async fn find_runset(&self, _: &str) -> CollaboratorResult<Runset> {
            Err(CollaboratorError::unavailable("infra", "down"))
        }
        async fn prepare_runners(&self, _: &str) -> CollaboratorResult<Vec<String>> {
            Err(CollaboratorError::unavailable("infra", "down"))
        }
        async fn start_instances(&self, _: &str, _: &[String]) -> CollaboratorResult<Vec<String>> {
            Err(CollaboratorError::unavailable("infra", "down"))
        }
        async fn instances_status(&self, _: &[String]) -> CollaboratorResult<InstancesStatus> {
            Err(CollaboratorError::unavailable("infra", "down"))
        }
        async fn runs_finished(&self, _: &str) -> CollaboratorResult<bool> {
            Err(CollaboratorError::unavailable("arcee", "down"))
        }
        async fn prepare_destroy(&self, _: &str, _: &str) -> CollaboratorResult<()> {
            Err(CollaboratorError::unavailable("infra", "down"))
        }
        async fn destroy_instances(&self, _: &[String]) -> CollaboratorResult<()> {
            Err(CollaboratorError::unavailable("infra", "down"))
        }
    }

    #[test]
    fn test_exhausted_retries_with_instances_divert_to_destroy() {
        let table = InfraTable::new(Arc::new(Unreachable));

        for state in [InfraState::Started, InfraState::WaitingArcee] {
            match table.on_retries_exhausted(state, "arcee unavailable: down".into()) {
                HandlerOutcome::Success {
                    next_state,
                    payload_delta: Some(delta),
                } => {
                    assert_eq!(next_state, InfraState::DestroyPreparing);
                    assert_eq!(
                        delta.get(DESTROY_REASON).and_then(|v| v.as_str()),
                        Some("retries exhausted: arcee unavailable: down")
                    );
                }
                other => panic!("unexpected outcome {other:?}"),
            }
        }

        assert_eq!(
            table.on_retries_exhausted(InfraState::DestroyPreparing, "down".into()),
            HandlerOutcome::advance_to(InfraState::Destroying)
        );
        assert!(matches!(
            table.on_retries_exhausted(InfraState::Starting, "down".into()),
            HandlerOutcome::PermanentFailure { .. }
        ));
        assert!(matches!(
            table.on_retries_exhausted(InfraState::Destroying, "down".into()),
            HandlerOutcome::PermanentFailure { .. }
        ));
    }
}
