//! Transition engine: applies one event to one state against a compiled table.
//!
//! This is a pure function. Stores, caches and the bus live elsewhere.

use crate::definition::{State, TransitionTable};

/// Result of applying an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyResult {
    pub from_state: State,
    pub to_state: State,
    pub accepted: bool,
}

impl ApplyResult {
    /// Returns true if the state actually changes.
    pub fn changes_state(&self) -> bool {
        self.accepted && self.from_state != self.to_state
    }
}

/// Applies `event` to `current` using `table`.
///
/// Undeclared (state, event) pairs are not accepted and leave the state
/// unchanged.
pub fn apply(table: &TransitionTable, current: &str, event: &str) -> ApplyResult {
    match table.lookup(current, event) {
        Some(to) => ApplyResult {
            from_state: State::from(current),
            to_state: to.clone(),
            accepted: true,
        },
        None => ApplyResult {
            from_state: State::from(current),
            to_state: State::from(current),
            accepted: false,
        },
    }
}

impl TransitionTable {
    /// Applies an event. See [`apply`].
    pub fn apply(&self, current: &str, event: &str) -> ApplyResult {
        apply(self, current, event)
    }

    /// Folds a sequence of events from the initial state, returning every step.
    pub fn run<'a, I>(&self, events: I) -> Vec<ApplyResult>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut current = self.initial().clone();
        let mut steps = Vec::new();
        for event in events {
            let step = self.apply(current.as_str(), event);
            current = step.to_state.clone();
            steps.push(step);
        }
        steps
    }
}
