use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

/// How the executor treats a state once a task has entered it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateMode {
    /// Handler runs immediately after entry, chained in the same `advance`
    SelfAdvancing,
    /// Executor stops; a later message re-polls the handler
    Wait,
    /// Sink, no handler
    Terminal,
}

impl fmt::Display for StateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelfAdvancing => write!(f, "self_advancing"),
            Self::Wait => write!(f, "wait"),
            Self::Terminal => write!(f, "terminal"),
        }
    }
}

/// Closed state set of one table kind
///
/// Usually declared with [`workflow_states!`](crate::workflow_states), which
/// ranks variants by declaration order.
pub trait WorkflowState:
    Copy + Eq + Hash + fmt::Debug + fmt::Display + FromStr<Err = String> + Send + Sync + 'static
{
    /// State new records are created in
    const INITIAL: Self;
    /// Absorbing failure state
    const ERROR: Self;

    fn all() -> &'static [Self];

    /// Persisted label
    fn as_str(&self) -> &'static str;

    fn mode(&self) -> StateMode;

    /// Position in the table's topological order
    fn rank(&self) -> usize;

    fn is_terminal(&self) -> bool {
        self.mode() == StateMode::Terminal
    }

    fn is_wait(&self) -> bool {
        self.mode() == StateMode::Wait
    }

    /// Labels of every wait state, for the re-poll scan
    fn wait_labels() -> Vec<&'static str> {
        Self::all()
            .iter()
            .filter(|s| s.is_wait())
            .map(|s| s.as_str())
            .collect()
    }

    /// Forward edges only, plus the error sink from any non-terminal state
    fn can_advance_to(&self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Self::ERROR || next.rank() > self.rank()
    }
}
