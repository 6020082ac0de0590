//! Proptest strategies for scripted handler behaviour

use proptest::prelude::*;

/// One scripted handler reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Success naming the state at this index of the state list, valid or not
    Goto(usize),
    Transient,
    Permanent,
    StillWaiting,
}

pub fn step_strategy(state_count: usize) -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (0..state_count).prop_map(Step::Goto),
        3 => Just(Step::Transient),
        1 => Just(Step::Permanent),
        2 => Just(Step::StillWaiting),
    ]
}

pub fn script_strategy(state_count: usize) -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(step_strategy(state_count), 0..24)
}
