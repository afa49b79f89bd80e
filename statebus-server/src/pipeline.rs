//! Event consumption pipeline.
//!
//! One record at a time: decode the envelope, resolve the definition and its
//! compiled table, read the instance's current state, apply the event and,
//! when accepted, write the new state. Permanent problems end in an
//! [`Outcome`]; transient ones are returned as errors so the caller can
//! retry the same record.

use crate::broadcast::{TransitionBroadcaster, TransitionEvent};
use crate::error::ServiceError;
use crate::io::IoPolicy;
use crate::metrics::Metrics;
use crate::tables::TableCache;
use statebus_bus::Record;
use statebus_core::{validate_definition_id, DefinitionError};
use statebus_protocol::Envelope;
use statebus_storage::{DefinitionStore, StateCache};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Old and new state of one instance after one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub definition_id: String,
    pub instance_id: String,
    pub event: String,
    pub from_state: String,
    pub to_state: String,
}

/// Why a record was discarded without effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The payload is not a valid envelope.
    Malformed(String),
    /// No stored definition has this id.
    UnknownDefinition(String),
    /// The stored definition does not compile.
    InvalidDefinition {
        definition_id: String,
        error: DefinitionError,
    },
    /// The store or cache failed in a way repeating will not fix.
    Storage {
        definition_id: String,
        error: String,
    },
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Malformed(e) => write!(f, "malformed payload: {}", e),
            DropReason::UnknownDefinition(id) => write!(f, "unknown definition {}", id),
            DropReason::InvalidDefinition {
                definition_id,
                error,
            } => write!(f, "definition {} does not compile: {}", definition_id, error),
            DropReason::Storage {
                definition_id,
                error,
            } => write!(f, "permanent storage failure for {}: {}", definition_id, error),
        }
    }
}

/// Result of processing one record. Every outcome is final: the record's
/// offset may be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Accepted(Transition),
    Rejected(Transition),
    Dropped(DropReason),
}

impl Outcome {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Accepted(_) => "accepted",
            Outcome::Rejected(_) => "rejected",
            Outcome::Dropped(_) => "dropped",
        }
    }
}

/// Applies consumed events to instance state.
pub struct EventPipeline {
    store: Arc<dyn DefinitionStore>,
    cache: Arc<dyn StateCache>,
    tables: Arc<TableCache>,
    io: IoPolicy,
    broadcaster: Option<Arc<TransitionBroadcaster>>,
    metrics: Option<Arc<Metrics>>,
}

impl EventPipeline {
    pub fn new(
        store: Arc<dyn DefinitionStore>,
        cache: Arc<dyn StateCache>,
        tables: Arc<TableCache>,
        io: IoPolicy,
    ) -> Self {
        Self {
            store,
            cache,
            tables,
            io,
            broadcaster: None,
            metrics: None,
        }
    }

    /// Sets the broadcaster notified of every accepted or rejected event.
    pub fn with_broadcaster(mut self, broadcaster: Arc<TransitionBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Processes one record.
    ///
    /// `Ok` means the record is done with and its offset may be committed.
    /// `Err` is always transient: the cache may or may not hold the new state
    /// and the record must be delivered again.
    pub async fn handle(&self, record: &Record) -> Result<Outcome, ServiceError> {
        let start = Instant::now();
        let result = self.process(record).await;

        match result {
            Ok(ref outcome) => {
                self.log(record, outcome);
                self.notify(record, outcome);
                if let Some(ref metrics) = self.metrics {
                    let label = outcome.label();
                    metrics.consumed_total.with_label_values(&[label]).inc();
                    metrics
                        .pipeline_duration
                        .with_label_values(&[label])
                        .observe(start.elapsed().as_secs_f64());
                    metrics.tables_cached.set(self.tables.len() as f64);
                }
            }
            Err(ref e) => {
                tracing::error!(
                    "Transient failure at {}/{}@{}: {}",
                    record.topic,
                    record.partition,
                    record.offset,
                    e
                );
            }
        }
        result
    }

    async fn process(&self, record: &Record) -> Result<Outcome, ServiceError> {
        let envelope = match Envelope::decode(&record.payload) {
            Ok(envelope) => envelope,
            Err(e) => return Ok(Outcome::Dropped(DropReason::Malformed(e.to_string()))),
        };

        if validate_definition_id(&envelope.definition_id).is_err() {
            return Ok(Outcome::Dropped(DropReason::UnknownDefinition(
                envelope.definition_id,
            )));
        }
        let definition = match self
            .io
            .call("definition get", self.store.get(&envelope.definition_id))
            .await
        {
            Ok(Some(definition)) => definition,
            Ok(None) => {
                return Ok(Outcome::Dropped(DropReason::UnknownDefinition(
                    envelope.definition_id,
                )))
            }
            Err(e) => return permanent(&envelope.definition_id, e),
        };

        let table = match self.tables.get_or_compile(&definition) {
            Ok(table) => table,
            Err(error) => {
                return Ok(Outcome::Dropped(DropReason::InvalidDefinition {
                    definition_id: definition.id,
                    error,
                }))
            }
        };

        let current = match self
            .io
            .call("cache get", self.cache.get(&envelope.instance_id))
            .await
        {
            Ok(state) => state.unwrap_or_else(|| table.initial().as_str().to_string()),
            Err(e) => return permanent(&envelope.definition_id, e),
        };

        let step = table.apply(&current, &envelope.event);
        let transition = Transition {
            definition_id: envelope.definition_id,
            instance_id: envelope.instance_id,
            event: envelope.event,
            from_state: step.from_state.into_string(),
            to_state: step.to_state.into_string(),
        };

        if !step.accepted {
            return Ok(Outcome::Rejected(transition));
        }

        let written = self
            .io
            .call(
                "cache set",
                self.cache
                    .set(&transition.instance_id, &transition.to_state),
            )
            .await;
        if let Err(e) = written {
            return permanent(&transition.definition_id, e);
        }

        Ok(Outcome::Accepted(transition))
    }

    fn log(&self, record: &Record, outcome: &Outcome) {
        match outcome {
            Outcome::Accepted(t) => tracing::info!(
                "{}/{}: {} --{}--> {} (partition {}, offset {})",
                t.definition_id,
                t.instance_id,
                t.from_state,
                t.event,
                t.to_state,
                record.partition,
                record.offset
            ),
            Outcome::Rejected(t) => tracing::warn!(
                "{}/{}: event {} not accepted in state {} (partition {}, offset {})",
                t.definition_id,
                t.instance_id,
                t.event,
                t.from_state,
                record.partition,
                record.offset
            ),
            Outcome::Dropped(
                reason @ (DropReason::InvalidDefinition { .. } | DropReason::Storage { .. }),
            ) => tracing::error!(
                "Dropped record {}/{}@{}: {}",
                record.topic,
                record.partition,
                record.offset,
                reason
            ),
            Outcome::Dropped(reason) => tracing::warn!(
                "Dropped record {}/{}@{}: {}",
                record.topic,
                record.partition,
                record.offset,
                reason
            ),
        }
    }

    fn notify(&self, record: &Record, outcome: &Outcome) {
        let Some(ref broadcaster) = self.broadcaster else {
            return;
        };
        let (transition, accepted) = match outcome {
            Outcome::Accepted(t) => (t, true),
            Outcome::Rejected(t) => (t, false),
            Outcome::Dropped(_) => return,
        };
        broadcaster.notify(TransitionEvent {
            definition_id: transition.definition_id.clone(),
            instance_id: transition.instance_id.clone(),
            event: transition.event.clone(),
            from_state: transition.from_state.clone(),
            to_state: transition.to_state.clone(),
            accepted,
            partition: record.partition,
            offset: record.offset,
        });
    }
}

/// Passes transient errors up for a retry; anything else drops the record.
fn permanent(definition_id: &str, error: ServiceError) -> Result<Outcome, ServiceError> {
    if error.is_retryable() {
        return Err(error);
    }
    Ok(Outcome::Dropped(DropReason::Storage {
        definition_id: definition_id.to_string(),
        error: error.to_string(),
    }))
}
