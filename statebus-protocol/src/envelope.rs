//! Event envelope carried on the bus.
//!
//! Wire shape (JSON):
//!
//! ```json
//! {"definitionId": "order-flow", "instanceId": "order-42", "event": "pay"}
//! ```
//!
//! Older producers used `stateMachineId` and `processId`; both are accepted
//! on decode. Encoding always uses the current names.

use crate::error::ProtocolError;
use crate::MAX_ENVELOPE_SIZE;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// An event addressed to one instance of one definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(alias = "stateMachineId")]
    pub definition_id: String,

    #[serde(alias = "processId")]
    pub instance_id: String,

    pub event: String,
}

impl Envelope {
    pub fn new(
        definition_id: impl Into<String>,
        instance_id: impl Into<String>,
        event: impl Into<String>,
    ) -> Self {
        Self {
            definition_id: definition_id.into(),
            instance_id: instance_id.into(),
            event: event.into(),
        }
    }

    /// Checks that every field is present and non-empty.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.definition_id.is_empty() {
            return Err(ProtocolError::MissingField("definitionId"));
        }
        if self.instance_id.is_empty() {
            return Err(ProtocolError::MissingField("instanceId"));
        }
        if self.event.is_empty() {
            return Err(ProtocolError::MissingField("event"));
        }
        Ok(())
    }

    /// Encodes the envelope as a JSON payload.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        self.validate()?;
        let data = serde_json::to_vec(self)?;
        Ok(Bytes::from(data))
    }

    /// Decodes and validates a JSON payload.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() > MAX_ENVELOPE_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_ENVELOPE_SIZE,
            });
        }
        let envelope: Envelope = serde_json::from_slice(payload)?;
        envelope.validate()?;
        Ok(envelope)
    }

    /// Key used for the bus record. Events for one instance share a key.
    pub fn key(&self) -> &str {
        &self.instance_id
    }
}
