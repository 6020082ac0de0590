use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use super::errors::{StateMachineError, StateMachineResult};
use super::executor::{AdvanceReport, TaskExecutor};
use super::states::WorkflowState;
use super::table::TransitionTable;
use crate::models::{TaskId, TaskKind};

/// Kind-erased view of an executor, so consumers can route by tag
#[async_trait]
pub trait TaskAdvancer: Send + Sync {
    fn kind(&self) -> TaskKind;

    /// Label new records of this kind start in
    fn initial_state(&self) -> &'static str;

    /// Labels of states that need an external re-poll
    fn wait_states(&self) -> Vec<&'static str>;

    async fn advance(&self, task_id: TaskId) -> StateMachineResult<AdvanceReport>;
}

#[async_trait]
impl<T: TransitionTable> TaskAdvancer for TaskExecutor<T> {
    fn kind(&self) -> TaskKind {
        TaskExecutor::kind(self)
    }

    fn initial_state(&self) -> &'static str {
        T::State::INITIAL.as_str()
    }

    fn wait_states(&self) -> Vec<&'static str> {
        T::State::wait_labels()
    }

    async fn advance(&self, task_id: TaskId) -> StateMachineResult<AdvanceReport> {
        TaskExecutor::advance(self, task_id).await
    }
}

/// One executor per kind, built once at startup and shared by reference
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<TaskKind, Arc<dyn TaskAdvancer>>,
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor under its own kind, replacing any previous one
    pub fn register(mut self, executor: Arc<dyn TaskAdvancer>) -> Self {
        self.executors.insert(executor.kind(), executor);
        self
    }

    pub fn get(&self, kind: TaskKind) -> StateMachineResult<Arc<dyn TaskAdvancer>> {
        self.executors
            .get(&kind)
            .cloned()
            .ok_or(StateMachineError::UnregisteredTable { kind })
    }

    pub fn kinds(&self) -> Vec<TaskKind> {
        let mut kinds: Vec<TaskKind> = self.executors.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    pub async fn advance(
        &self,
        kind: TaskKind,
        task_id: TaskId,
    ) -> StateMachineResult<AdvanceReport> {
        self.get(kind)?.advance(task_id).await
    }
}
