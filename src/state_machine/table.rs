use super::errors::{StateMachineError, StateMachineResult};
use super::handler::TransitionHandler;
use super::outcome::HandlerOutcome;
use super::states::WorkflowState;
use crate::models::TaskKind;

/// Static mapping from each state of one kind to its handler
///
/// Implementations match exhaustively on `Self::State`, so adding a state
/// without deciding its handler does not compile.
pub trait TransitionTable: Send + Sync + 'static {
    type State: WorkflowState;

    /// Kind tag of the records this table owns
    fn kind(&self) -> TaskKind;

    /// `None` for terminal states
    fn handler_for(&self, state: Self::State) -> Option<&dyn TransitionHandler<Self::State>>;

    /// Outcome applied when `state` fails transiently on its last allowed
    /// attempt. Defaults to the error sink.
    fn on_retries_exhausted(&self, state: Self::State, detail: String) -> HandlerOutcome<Self::State> {
        let _ = state;
        HandlerOutcome::permanent(detail)
    }

    fn resolve(&self, state: Self::State) -> StateMachineResult<&dyn TransitionHandler<Self::State>> {
        self.handler_for(state)
            .ok_or_else(|| StateMachineError::NoTransition {
                kind: self.kind(),
                state: state.as_str().to_string(),
            })
    }
}
