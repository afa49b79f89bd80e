//! Proptest strategies shared by the core tests.

use crate::definition::{MachineSpec, TransitionMap};
use proptest::prelude::*;

/// Generates well-formed specs: every transition draws its source, event and
/// target from the declared sets.
pub fn valid_spec() -> impl Strategy<Value = MachineSpec> {
    (
        prop::collection::btree_set("[a-z]{1,6}", 1..6),
        prop::collection::btree_set("[A-Z]{1,6}", 1..5),
    )
        .prop_flat_map(|(states, events)| {
            let states: Vec<String> = states.into_iter().collect();
            let events: Vec<String> = events.into_iter().collect();
            let edges = prop::collection::vec(
                (0..states.len(), 0..events.len(), 0..states.len()),
                0..12,
            );
            (Just(states), Just(events), edges)
        })
        .prop_map(|(states, events, edges)| {
            let mut transitions = TransitionMap::new();
            for (s, e, t) in edges {
                transitions
                    .entry(states[s].clone())
                    .or_default()
                    .insert(events[e].clone(), states[t].clone());
            }
            MachineSpec {
                states,
                events,
                transitions,
            }
        })
}
