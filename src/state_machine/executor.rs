//! # Task Executor
//!
//! Advances one task through its table: load, resolve, invoke, persist, and
//! chain through self-advancing states until a wait state, a terminal state,
//! a retry or the chain bound is reached.
//!
//! Every write is a compare-and-swap against the `(state, version)` the
//! executor read, so a racing executor can never overwrite a newer record.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::errors::{StateMachineError, StateMachineResult};
use super::handler::{TaskSnapshot, TransitionHandler};
use super::outcome::HandlerOutcome;
use super::retry::RetryPolicy;
use super::states::{StateMode, WorkflowState};
use super::table::TransitionTable;
use crate::config::ExecutorConfig;
use crate::constants::{
    DEFAULT_HANDLER_TIMEOUT_MS, DEFAULT_MAX_CHAIN_LENGTH, HANDLER_TIMEOUT_DETAIL,
    INVALID_TRANSITION_DETAIL,
};
use crate::events::{EventPublisher, TransitionEvent};
use crate::logging::log_transition;
use crate::models::{TaskId, TaskKind, TaskRecord};
use crate::store::TaskStore;

/// How an `advance` call ended
#[derive(Debug, Clone, PartialEq)]
pub enum AdvanceOutcome {
    /// Reached the nominal terminal state
    Completed { state: String },
    /// Moved to the error state
    Failed { state: String, error: String },
    /// Entered a wait state; a later message resumes it
    Suspended { state: String },
    /// Wait-state handler reported the external work is still running
    Waiting { state: String, detail: String },
    /// Transient failure recorded; retry the same state after `delay`
    RetryScheduled {
        state: String,
        attempt: u32,
        delay: Duration,
    },
    /// Record was already terminal; nothing was invoked
    AlreadyTerminal { state: String },
    /// Chain bound hit while still self-advancing
    ChainLimitReached { state: String },
}

impl AdvanceOutcome {
    pub fn state(&self) -> &str {
        match self {
            Self::Completed { state }
            | Self::Failed { state, .. }
            | Self::Suspended { state }
            | Self::Waiting { state, .. }
            | Self::RetryScheduled { state, .. }
            | Self::AlreadyTerminal { state }
            | Self::ChainLimitReached { state } => state,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::AlreadyTerminal { .. }
        )
    }
}

/// Summary of one `advance` call
#[derive(Debug, Clone, PartialEq)]
pub struct AdvanceReport {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub initial_state: String,
    /// Persisted state changes made by this call
    pub transitions: u32,
    pub outcome: AdvanceOutcome,
}

impl AdvanceReport {
    pub fn final_state(&self) -> &str {
        self.outcome.state()
    }
}

pub struct TaskExecutor<T: TransitionTable> {
    store: Arc<dyn TaskStore>,
    table: Arc<T>,
    retry_policy: RetryPolicy,
    events: EventPublisher,
    max_chain_length: u32,
    handler_timeout: Duration,
}

impl<T: TransitionTable> std::fmt::Debug for TaskExecutor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("kind", &self.table.kind())
            .field("store", &self.store.store_name())
            .field("retry_policy", &self.retry_policy)
            .field("max_chain_length", &self.max_chain_length)
            .field("handler_timeout", &self.handler_timeout)
            .finish()
    }
}

impl<T: TransitionTable> TaskExecutor<T> {
    pub fn new(store: Arc<dyn TaskStore>, table: Arc<T>, retry_policy: RetryPolicy) -> Self {
        Self {
            store,
            table,
            retry_policy,
            events: EventPublisher::default(),
            max_chain_length: DEFAULT_MAX_CHAIN_LENGTH,
            handler_timeout: Duration::from_millis(DEFAULT_HANDLER_TIMEOUT_MS),
        }
    }

    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = events;
        self
    }

    pub fn with_max_chain_length(mut self, max_chain_length: u32) -> Self {
        self.max_chain_length = max_chain_length.max(1);
        self
    }

    pub fn with_handler_timeout(mut self, handler_timeout: Duration) -> Self {
        self.handler_timeout = handler_timeout;
        self
    }

    /// Apply the executor section of the worker configuration
    pub fn with_config(self, config: &ExecutorConfig) -> Self {
        self.with_max_chain_length(config.max_chain_length)
            .with_handler_timeout(config.handler_timeout())
    }

    pub fn kind(&self) -> TaskKind {
        self.table.kind()
    }

    pub fn table(&self) -> &T {
        &self.table
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    /// Advance `task_id` as far as its table allows in one call
    pub async fn advance(&self, task_id: TaskId) -> StateMachineResult<AdvanceReport> {
        let kind = self.table.kind();
        let mut initial_state: Option<String> = None;
        let mut transitions = 0u32;

        loop {
            let record = self.store.load(task_id).await?;
            if record.kind != kind {
                return Err(StateMachineError::TableMismatch {
                    task_id,
                    expected: kind,
                    actual: record.kind,
                });
            }

            let state = self.parse_state(&record)?;
            let initial = initial_state
                .get_or_insert_with(|| record.state.clone())
                .clone();
            let report = |outcome| AdvanceReport {
                task_id,
                kind,
                initial_state: initial.clone(),
                transitions,
                outcome,
            };

            if state.is_terminal() {
                debug!(task_id = %task_id, state = %state, "Task already terminal");
                return Ok(report(AdvanceOutcome::AlreadyTerminal {
                    state: record.state,
                }));
            }
            if transitions >= self.max_chain_length {
                warn!(
                    task_id = %task_id,
                    state = %state,
                    max_chain_length = self.max_chain_length,
                    "Chain limit reached; handing off to a continuation message"
                );
                return Ok(report(AdvanceOutcome::ChainLimitReached {
                    state: record.state,
                }));
            }

            let handler = self.table.resolve(state)?;
            let attempts_used = record.attempt_count() + 1;
            let snapshot = TaskSnapshot::new(record.clone(), state);

            let started = Instant::now();
            let outcome = self.invoke(handler, &snapshot).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            debug!(
                task_id = %task_id,
                state = %state,
                handler = handler.name(),
                outcome = outcome.label(),
                attempt = attempts_used,
                duration_ms,
                "Handler returned"
            );

            let outcome = match outcome {
                HandlerOutcome::StillWaiting { detail } if !state.is_wait() => {
                    HandlerOutcome::transient(format!(
                        "{} reported waiting outside a wait state: {detail}",
                        handler.name()
                    ))
                }
                other => other,
            };
            // The table decides where a state goes once its retries run out
            let outcome = match outcome {
                HandlerOutcome::TransientFailure { detail }
                    if !self.retry_policy.allows_retry(attempts_used) =>
                {
                    warn!(
                        task_id = %task_id,
                        state = %state,
                        attempts = attempts_used,
                        max_attempts = self.retry_policy.max_attempts,
                        "Retry ceiling reached"
                    );
                    self.table.on_retries_exhausted(state, detail)
                }
                other => other,
            };

            match outcome {
                HandlerOutcome::Success { next_state, .. } if next_state == T::State::ERROR => {
                    let detail = format!("{} diverted task to {}", handler.name(), next_state);
                    let outcome = self
                        .fail(&record, attempts_used, &detail, duration_ms)
                        .await?;
                    return Ok(report(outcome));
                }
                HandlerOutcome::Success {
                    next_state,
                    payload_delta,
                } => {
                    if !state.can_advance_to(next_state) {
                        let detail =
                            format!("{INVALID_TRANSITION_DETAIL}: {state} -> {next_state}");
                        error!(task_id = %task_id, handler = handler.name(), "{detail}");
                        let outcome = self
                            .fail(&record, attempts_used, &detail, duration_ms)
                            .await?;
                        return Ok(report(outcome));
                    }

                    let next = record.advanced_to(
                        next_state.as_str(),
                        payload_delta.as_ref(),
                        attempts_used,
                    );
                    self.persist(&record, &next, duration_ms).await?;
                    transitions += 1;

                    let report = |outcome| AdvanceReport {
                        task_id,
                        kind,
                        initial_state: initial.clone(),
                        transitions,
                        outcome,
                    };
                    match next_state.mode() {
                        StateMode::SelfAdvancing => continue,
                        StateMode::Wait => {
                            return Ok(report(AdvanceOutcome::Suspended { state: next.state }))
                        }
                        StateMode::Terminal => {
                            info!(task_id = %task_id, kind = %kind, state = %next_state, "✅ Task completed");
                            return Ok(report(AdvanceOutcome::Completed { state: next.state }));
                        }
                    }
                }
                HandlerOutcome::StillWaiting { detail } if state.is_wait() => {
                    debug!(task_id = %task_id, state = %state, detail = %detail, "Still waiting");
                    if record.attempt_count() > 0 || record.last_error.is_some() {
                        // A healthy poll ends the run of consecutive failures
                        let next = record.with_failures_cleared();
                        self.persist(&record, &next, duration_ms).await?;
                    }
                    return Ok(report(AdvanceOutcome::Waiting {
                        state: record.state,
                        detail,
                    }));
                }
                HandlerOutcome::StillWaiting { detail } => {
                    let outcome = self
                        .fail(&record, attempts_used, &detail, duration_ms)
                        .await?;
                    return Ok(report(outcome));
                }
                HandlerOutcome::TransientFailure { detail } => {
                    let outcome = self
                        .retry_or_fail(&record, attempts_used, &detail, duration_ms)
                        .await?;
                    return Ok(report(outcome));
                }
                HandlerOutcome::PermanentFailure { detail } => {
                    let outcome = self
                        .fail(&record, attempts_used, &detail, duration_ms)
                        .await?;
                    return Ok(report(outcome));
                }
            }
        }
    }

    fn parse_state(&self, record: &TaskRecord) -> StateMachineResult<T::State> {
        record
            .state
            .parse::<T::State>()
            .map_err(|_| StateMachineError::UnknownState {
                task_id: record.task_id,
                kind: record.kind,
                state: record.state.clone(),
            })
    }

    /// Run the handler under the timeout; a panic or a timeout is transient
    async fn invoke(
        &self,
        handler: &dyn TransitionHandler<T::State>,
        snapshot: &TaskSnapshot<T::State>,
    ) -> HandlerOutcome<T::State> {
        let result = tokio::time::timeout(
            self.handler_timeout,
            AssertUnwindSafe(handler.handle(snapshot)).catch_unwind(),
        )
        .await;

        match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(panic_error)) => {
                let panic_msg = if let Some(s) = panic_error.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_error.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                error!(
                    task_id = %snapshot.task_id(),
                    handler = handler.name(),
                    panic_msg = %panic_msg,
                    "Handler panicked"
                );
                HandlerOutcome::transient(format!("Handler panicked: {panic_msg}"))
            }
            Err(_) => {
                warn!(
                    task_id = %snapshot.task_id(),
                    handler = handler.name(),
                    timeout_ms = self.handler_timeout.as_millis() as u64,
                    "Handler timed out"
                );
                HandlerOutcome::transient(format!(
                    "{HANDLER_TIMEOUT_DETAIL} after {}ms",
                    self.handler_timeout.as_millis()
                ))
            }
        }
    }

    async fn retry_or_fail(
        &self,
        record: &TaskRecord,
        attempts_used: u32,
        detail: &str,
        duration_ms: u64,
    ) -> StateMachineResult<AdvanceOutcome> {
        if !self.retry_policy.allows_retry(attempts_used) {
            return self.fail(record, attempts_used, detail, duration_ms).await;
        }

        let next = record.with_transient_failure(attempts_used, detail);
        self.persist(record, &next, duration_ms).await?;

        Ok(AdvanceOutcome::RetryScheduled {
            state: next.state,
            attempt: attempts_used,
            delay: self.retry_policy.delay_for(attempts_used),
        })
    }

    async fn fail(
        &self,
        record: &TaskRecord,
        attempts_used: u32,
        detail: &str,
        duration_ms: u64,
    ) -> StateMachineResult<AdvanceOutcome> {
        let error_state = T::State::ERROR.as_str();
        let next = record.failed(error_state, attempts_used, detail);
        self.persist(record, &next, duration_ms).await?;

        Ok(AdvanceOutcome::Failed {
            state: next.state,
            error: detail.to_string(),
        })
    }

    /// Compare-and-swap `next` over `read`, then log and publish the write
    async fn persist(
        &self,
        read: &TaskRecord,
        next: &TaskRecord,
        duration_ms: u64,
    ) -> StateMachineResult<()> {
        let swapped = self
            .store
            .compare_and_swap(read.task_id, &read.state, read.version, next)
            .await?;

        if !swapped {
            warn!(
                task_id = %read.task_id,
                expected_state = %read.state,
                expected_version = read.version,
                "Compare-and-swap rejected; another executor advanced this task"
            );
            return Err(StateMachineError::ConcurrentModification {
                task_id: read.task_id,
                expected_state: read.state.clone(),
                expected_version: read.version,
            });
        }

        log_transition(
            read.task_id,
            read.kind,
            &read.state,
            &next.state,
            duration_ms,
            next.last_error.as_deref(),
        );

        let mut event = TransitionEvent::new(
            read.task_id,
            read.kind,
            read.state.as_str(),
            next.state.as_str(),
            duration_ms,
            next.last_error.clone(),
        );
        if let Ok(state) = next.state.parse::<T::State>() {
            if state.is_terminal() {
                event = event.terminal(state == T::State::ERROR);
            }
        }
        self.events.publish(event);

        Ok(())
    }
}
