//! Progression and retry-ceiling properties over arbitrary handler behaviour

mod common;

use async_trait::async_trait;
use proptest::prelude::*;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use common::strategies::{script_strategy, Step};
use fsm_worker::events::EventPublisher;
use fsm_worker::models::{NewTask, TaskKind};
use fsm_worker::state_machine::{
    AdvanceOutcome, HandlerOutcome, RetryPolicy, TaskExecutor, TaskSnapshot, TransitionHandler,
    TransitionTable, WorkflowState,
};
use fsm_worker::store::{InMemoryTaskStore, TaskStore};
use fsm_worker::workflow_states;

workflow_states! {
    enum Flow {
        initial = Created,
        error = Error,
        states {
            Created => ("created", SelfAdvancing),
            Fetching => ("fetching", SelfAdvancing),
            Parked => ("parked", Wait),
            Finishing => ("finishing", SelfAdvancing),
            Done => ("done", Terminal),
            Error => ("error", Terminal),
        }
    }
}

/// Replays a script; once it runs dry every state moves one step forward
struct ScriptedHandler {
    script: Mutex<VecDeque<Step>>,
}

#[async_trait]
impl TransitionHandler<Flow> for ScriptedHandler {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn handle(&self, task: &TaskSnapshot<Flow>) -> HandlerOutcome<Flow> {
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Goto(index)) => HandlerOutcome::advance_to(Flow::ALL[index]),
            Some(Step::Transient) => HandlerOutcome::transient("flaky dependency"),
            Some(Step::Permanent) => HandlerOutcome::permanent("dependency gone"),
            Some(Step::StillWaiting) => HandlerOutcome::still_waiting("not yet"),
            None => HandlerOutcome::advance_to(Flow::ALL[task.state().rank() + 1]),
        }
    }
}

struct FlowTable {
    handler: ScriptedHandler,
}

impl TransitionTable for FlowTable {
    type State = Flow;

    fn kind(&self) -> TaskKind {
        TaskKind::Checklist
    }

    fn handler_for(&self, state: Flow) -> Option<&dyn TransitionHandler<Flow>> {
        match state {
            Flow::Created | Flow::Fetching | Flow::Parked | Flow::Finishing => Some(&self.handler),
            Flow::Done | Flow::Error => None,
        }
    }
}

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay_ms: 1,
        max_delay_ms: 1,
        backoff_multiplier: 1.0,
    }
}

fn rank_of(label: &str) -> usize {
    label.parse::<Flow>().unwrap().rank()
}

/// Everything observed while driving one task with a script
struct Run {
    states: Vec<String>,
    max_attempts_seen: u32,
    edges: Vec<(String, String)>,
    outcomes: Vec<AdvanceOutcome>,
}

fn drive(script: Vec<Step>, max_attempts: u32, advances: usize) -> Run {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async move {
        let store = Arc::new(InMemoryTaskStore::new());
        let events = EventPublisher::new(1024);
        let mut rx = events.subscribe();
        let table = FlowTable {
            handler: ScriptedHandler {
                script: Mutex::new(script.into()),
            },
        };
        let executor = TaskExecutor::new(store.clone(), Arc::new(table), policy(max_attempts))
            .with_events(events);

        let id = store
            .create(NewTask::new(
                TaskKind::Checklist,
                Flow::INITIAL.as_str(),
                serde_json::json!({}),
            ))
            .await
            .unwrap();

        let mut run = Run {
            states: vec![Flow::INITIAL.as_str().to_string()],
            max_attempts_seen: 0,
            edges: Vec::new(),
            outcomes: Vec::new(),
        };
        for _ in 0..advances {
            let report = executor.advance(id).await.unwrap();
            let record = store.load(id).await.unwrap();
            run.max_attempts_seen = run
                .max_attempts_seen
                .max(record.attempts.values().copied().max().unwrap_or(0));
            run.states.push(record.state);
            run.outcomes.push(report.outcome);
        }
        while let Ok(event) = rx.try_recv() {
            run.edges.push((event.from_state, event.to_state));
        }
        run
    })
}

proptest! {
    /// Persisted states only move forward, and terminal states never change
    #[test]
    fn states_never_move_backward(script in script_strategy(Flow::ALL.len()), max_attempts in 1u32..5) {
        let run = drive(script, max_attempts, 40);

        for pair in run.states.windows(2) {
            let (before, after) = (rank_of(&pair[0]), rank_of(&pair[1]));
            prop_assert!(after >= before, "{} -> {}", pair[0], pair[1]);
            if pair[0].parse::<Flow>().unwrap().is_terminal() {
                prop_assert_eq!(&pair[0], &pair[1]);
            }
        }

        for (from, to) in &run.edges {
            let forward = rank_of(to) > rank_of(from);
            let retry = from == to;
            prop_assert!(forward || retry || to == "error", "bad edge {} -> {}", from, to);
        }
    }

    /// No state is ever invoked more often than the retry policy allows
    #[test]
    fn attempts_never_exceed_ceiling(script in script_strategy(Flow::ALL.len()), max_attempts in 1u32..5) {
        let run = drive(script, max_attempts, 40);
        prop_assert!(run.max_attempts_seen <= max_attempts);

        let last = run.states.last().unwrap();
        prop_assert!(last == "done" || last == "error" || last == "parked", "ended in {}", last);
    }

    /// A handler that always fails transiently lands in error after exactly the ceiling
    #[test]
    fn persistent_transient_failure_reaches_error(max_attempts in 1u32..6) {
        let script = vec![Step::Transient; max_attempts as usize];
        let run = drive(script, max_attempts, max_attempts as usize);

        let retries = run
            .outcomes
            .iter()
            .filter(|o| matches!(o, AdvanceOutcome::RetryScheduled { .. }))
            .count();
        prop_assert_eq!(retries, max_attempts as usize - 1);
        let ended_failed = matches!(run.outcomes.last(), Some(AdvanceOutcome::Failed { .. }));
        prop_assert!(ended_failed);
        prop_assert_eq!(run.states.last().unwrap().as_str(), "error");
    }
}
