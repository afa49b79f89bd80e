//! State machine definition types.
//!
//! Definitions use a JSON document shape:
//!
//! ```json
//! {
//!   "id": "order-flow",
//!   "name": "order",
//!   "states": ["new", "paid", "shipped"],
//!   "events": ["pay", "ship"],
//!   "transitions": {
//!     "new": {"pay": "paid"},
//!     "paid": {"ship": "shipped"}
//!   },
//!   "partition": 3
//! }
//! ```
//!
//! The first declared state is the implicit initial state of every instance.

use crate::error::DefinitionError;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// Maximum length of a definition id.
pub const MAX_ID_LEN: usize = 128;

/// Source state -> (event -> target state).
pub type TransitionMap = BTreeMap<String, BTreeMap<String, String>>;

/// A state in the machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State(pub String);

impl State {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<&str> for State {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for State {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for State {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The mutable body of a definition: everything an update may replace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineSpec {
    /// All valid states. Index 0 is the initial state.
    pub states: Vec<String>,

    /// All valid events.
    pub events: Vec<String>,

    /// Declared transitions.
    #[serde(default)]
    pub transitions: TransitionMap,
}

impl MachineSpec {
    /// Validates the spec and builds an executable transition table.
    pub fn compile(&self) -> Result<TransitionTable, DefinitionError> {
        if self.states.is_empty() {
            return Err(DefinitionError::NoStates);
        }
        if self.events.is_empty() {
            return Err(DefinitionError::NoEvents);
        }

        let mut states = HashSet::with_capacity(self.states.len());
        for s in &self.states {
            if s.is_empty() {
                return Err(DefinitionError::EmptyStateName);
            }
            if !states.insert(s.as_str()) {
                return Err(DefinitionError::DuplicateState { state: s.clone() });
            }
        }

        let mut events = HashSet::with_capacity(self.events.len());
        for e in &self.events {
            if e.is_empty() {
                return Err(DefinitionError::EmptyEventName);
            }
            if !events.insert(e.as_str()) {
                return Err(DefinitionError::DuplicateEvent { event: e.clone() });
            }
        }

        let mut transitions: HashMap<State, HashMap<String, State>> = HashMap::new();
        for (from, by_event) in &self.transitions {
            if !states.contains(from.as_str()) {
                return Err(DefinitionError::UnknownSource {
                    state: from.clone(),
                });
            }

            let row = transitions.entry(State::from(from.as_str())).or_default();
            for (event, to) in by_event {
                if !events.contains(event.as_str()) {
                    return Err(DefinitionError::UnknownEvent {
                        state: from.clone(),
                        event: event.clone(),
                    });
                }
                if !states.contains(to.as_str()) {
                    return Err(DefinitionError::UnknownTarget {
                        state: from.clone(),
                        event: event.clone(),
                        target: to.clone(),
                    });
                }
                row.insert(event.clone(), State::from(to.as_str()));
            }
        }

        Ok(TransitionTable {
            states: self.states.iter().map(|s| State::from(s.as_str())).collect(),
            transitions,
            fingerprint: self.fingerprint(),
        })
    }

    /// CRC32C over the spec contents, used to detect stale compiled tables.
    pub fn fingerprint(&self) -> u32 {
        let mut crc = 0u32;
        for s in &self.states {
            crc = crc32c::crc32c_append(crc, s.as_bytes());
            crc = crc32c::crc32c_append(crc, &[0]);
        }
        crc = crc32c::crc32c_append(crc, &[1]);
        for e in &self.events {
            crc = crc32c::crc32c_append(crc, e.as_bytes());
            crc = crc32c::crc32c_append(crc, &[0]);
        }
        crc = crc32c::crc32c_append(crc, &[1]);
        for (from, by_event) in &self.transitions {
            for (event, to) in by_event {
                crc = crc32c::crc32c_append(crc, from.as_bytes());
                crc = crc32c::crc32c_append(crc, &[0]);
                crc = crc32c::crc32c_append(crc, event.as_bytes());
                crc = crc32c::crc32c_append(crc, &[0]);
                crc = crc32c::crc32c_append(crc, to.as_bytes());
                crc = crc32c::crc32c_append(crc, &[2]);
            }
        }
        crc
    }
}

/// A stored machine definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    /// Unique id, immutable after creation.
    #[serde(alias = "_id")]
    pub id: String,

    /// Human label.
    #[serde(default, alias = "stateMachineName")]
    pub name: String,

    /// States, events and transitions.
    #[serde(flatten)]
    pub spec: MachineSpec,

    /// Bus partition for all events of this definition.
    pub partition: u32,
}

impl Definition {
    /// Compiles the definition's transition table.
    pub fn compile(&self) -> Result<TransitionTable, DefinitionError> {
        self.spec.compile()
    }

    /// Returns the implicit initial state, if any state is declared.
    pub fn initial_state(&self) -> Option<&str> {
        self.spec.states.first().map(String::as_str)
    }
}

/// Checks that a definition id is usable as a store key.
pub fn validate_definition_id(id: &str) -> Result<(), DefinitionError> {
    let invalid = |reason| DefinitionError::InvalidId {
        id: id.to_string(),
        reason,
    };

    if id.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if id.len() > MAX_ID_LEN {
        return Err(invalid("longer than 128 characters"));
    }
    if id == "." || id == ".." {
        return Err(invalid("reserved name"));
    }
    if !id
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
    {
        return Err(invalid("only [A-Za-z0-9._-] allowed"));
    }
    Ok(())
}

/// Validated, indexed transition table.
///
/// Defined only on the (state, event) pairs that were declared; every other
/// pair is not accepted.
#[derive(Debug, Clone)]
pub struct TransitionTable {
    /// Declared states in order. Index 0 is the initial state.
    states: Vec<State>,

    /// Transitions indexed by from_state -> event -> to_state.
    transitions: HashMap<State, HashMap<String, State>>,

    /// Fingerprint of the spec this table was compiled from.
    fingerprint: u32,
}

impl TransitionTable {
    /// Looks up the target of a transition.
    pub fn lookup(&self, state: &str, event: &str) -> Option<&State> {
        self.transitions.get(state).and_then(|row| row.get(event))
    }

    /// Returns the initial state.
    pub fn initial(&self) -> &State {
        // compile() rejects definitions without states
        &self.states[0]
    }

    /// Returns the declared states in order.
    pub fn states(&self) -> &[State] {
        &self.states
    }

    /// Returns true if the given state is declared.
    pub fn has_state(&self, state: &str) -> bool {
        self.states.iter().any(|s| s.as_str() == state)
    }

    /// Returns all events accepted from the given state, sorted.
    pub fn events_from(&self, state: &str) -> Vec<&str> {
        let mut events: Vec<&str> = self
            .transitions
            .get(state)
            .map(|row| row.keys().map(String::as_str).collect())
            .unwrap_or_default();
        events.sort_unstable();
        events
    }

    /// Number of declared transitions.
    pub fn len(&self) -> usize {
        self.transitions.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fingerprint(&self) -> u32 {
        self.fingerprint
    }
}
