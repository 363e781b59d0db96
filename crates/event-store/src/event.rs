use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::TransferId;

/// Unique identifier for a stored event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

/// Position of a transfer's stream, used for optimistic concurrency control.
///
/// An unknown transfer sits at version 0; its creation event is version 1 and
/// every status change bumps it by one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Version of a stream with no events.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Version written by the first event of a stream.
    pub fn first() -> Self {
        Self(1)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored event together with the stream position it was written at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: EventId,

    /// Event name, e.g. `"TransferCreated"` or `"StatusChanged"`.
    pub event_type: String,

    /// The transfer stream this event belongs to.
    pub transfer_id: TransferId,

    /// Stream version after this event.
    pub version: Version,

    pub recorded_at: DateTime<Utc>,

    pub payload: serde_json::Value,

    /// Correlation data (acting user, request id).
    pub metadata: HashMap<String, serde_json::Value>,
}

impl EventEnvelope {
    pub fn builder() -> EventEnvelopeBuilder {
        EventEnvelopeBuilder::default()
    }

    /// Deserializes the payload into a concrete event type.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Builder for [`EventEnvelope`]. Missing required fields make
/// [`build`](EventEnvelopeBuilder::build) return `None`; the id and the
/// timestamp are assigned at build time.
#[derive(Debug, Default)]
pub struct EventEnvelopeBuilder {
    event_type: Option<String>,
    transfer_id: Option<TransferId>,
    version: Option<Version>,
    payload: Option<serde_json::Value>,
    metadata: HashMap<String, serde_json::Value>,
}

impl EventEnvelopeBuilder {
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn transfer_id(mut self, id: TransferId) -> Self {
        self.transfer_id = Some(id);
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Serializes `payload` into the envelope.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn build(self) -> Option<EventEnvelope> {
        Some(EventEnvelope {
            event_id: EventId::new(),
            event_type: self.event_type?,
            transfer_id: self.transfer_id?,
            version: self.version?,
            recorded_at: Utc::now(),
            payload: self.payload?,
            metadata: self.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_initial_precedes_first() {
        assert_eq!(Version::initial().as_i64(), 0);
        assert_eq!(Version::initial().next(), Version::first());
        assert!(Version::first() < Version::new(2));
    }

    #[test]
    fn builder_fills_defaults() {
        let transfer_id = TransferId::new();
        let envelope = EventEnvelope::builder()
            .event_type("StatusChanged")
            .transfer_id(transfer_id)
            .version(Version::new(3))
            .payload_raw(serde_json::json!({"to": "Assigned"}))
            .metadata("actor", serde_json::json!("system"))
            .build()
            .unwrap();

        assert_eq!(envelope.transfer_id, transfer_id);
        assert_eq!(envelope.version, Version::new(3));
        assert_eq!(
            envelope.metadata.get("actor"),
            Some(&serde_json::json!("system"))
        );
    }

    #[test]
    fn builder_without_required_fields_yields_none() {
        assert!(EventEnvelope::builder().build().is_none());
        assert!(
            EventEnvelope::builder()
                .event_type("StatusChanged")
                .transfer_id(TransferId::new())
                .build()
                .is_none()
        );
    }

    #[test]
    fn decode_reads_payload() {
        #[derive(Deserialize)]
        struct Body {
            to: String,
        }

        let envelope = EventEnvelope::builder()
            .event_type("StatusChanged")
            .transfer_id(TransferId::new())
            .version(Version::first())
            .payload_raw(serde_json::json!({"to": "Assigned"}))
            .build()
            .unwrap();

        let body: Body = envelope.decode().unwrap();
        assert_eq!(body.to, "Assigned");
    }
}
