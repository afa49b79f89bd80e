//! Event production: routes an event to its definition's partition.

use crate::error::ServiceError;
use crate::io::IoPolicy;
use crate::metrics::Metrics;
use serde::Serialize;
use statebus_bus::{MessageBus, ProducerRecord};
use statebus_core::validate_definition_id;
use statebus_protocol::Envelope;
use statebus_storage::DefinitionStore;
use std::sync::Arc;

/// Acknowledgement of a published event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReceipt {
    pub definition_id: String,
    pub instance_id: String,
    pub event: String,
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    /// Append time, milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Publishes events for stored definitions.
pub struct EventProducer {
    store: Arc<dyn DefinitionStore>,
    bus: Arc<dyn MessageBus>,
    topic: String,
    io: IoPolicy,
    metrics: Option<Arc<Metrics>>,
}

impl EventProducer {
    pub fn new(
        store: Arc<dyn DefinitionStore>,
        bus: Arc<dyn MessageBus>,
        topic: impl Into<String>,
        io: IoPolicy,
    ) -> Self {
        Self {
            store,
            bus,
            topic: topic.into(),
            io,
            metrics: None,
        }
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Publishes `event` for `instance_id` of `definition_id`.
    ///
    /// The record goes to the partition stored with the definition and is
    /// keyed by the instance id. Failures are returned as-is; nothing is
    /// retried here. The event name is not checked against the definition.
    pub async fn publish(
        &self,
        definition_id: &str,
        instance_id: &str,
        event: &str,
    ) -> Result<PublishReceipt, ServiceError> {
        let result = self.publish_inner(definition_id, instance_id, event).await;
        if let Some(ref metrics) = self.metrics {
            let label = match result {
                Ok(_) => "ok".to_string(),
                Err(ref e) => e.error_code().to_string(),
            };
            metrics.published_total.with_label_values(&[label.as_str()]).inc();
        }
        result
    }

    async fn publish_inner(
        &self,
        definition_id: &str,
        instance_id: &str,
        event: &str,
    ) -> Result<PublishReceipt, ServiceError> {
        let envelope = Envelope::new(definition_id, instance_id, event);
        envelope.validate()?;

        if validate_definition_id(definition_id).is_err() {
            return Err(ServiceError::NotFound(definition_id.to_string()));
        }
        let definition = self
            .io
            .call("definition get", self.store.get(definition_id))
            .await?
            .ok_or_else(|| ServiceError::NotFound(definition_id.to_string()))?;

        let record = ProducerRecord::new(
            self.topic.as_str(),
            definition.partition,
            envelope.key(),
            envelope.encode()?,
        );

        let ack = match self.io.call("bus publish", self.bus.publish(record)).await {
            Ok(ack) => ack,
            Err(e) => {
                tracing::error!(
                    "Failed to publish {} for {}/{}: {}",
                    event,
                    definition_id,
                    instance_id,
                    e
                );
                return Err(e);
            }
        };

        tracing::debug!(
            "Published {} for {}/{} to {}/{}@{}",
            event,
            definition_id,
            instance_id,
            ack.topic,
            ack.partition,
            ack.offset
        );

        Ok(PublishReceipt {
            definition_id: envelope.definition_id,
            instance_id: envelope.instance_id,
            event: envelope.event,
            topic: ack.topic,
            partition: ack.partition,
            offset: ack.offset,
            timestamp: ack.timestamp,
        })
    }
}
