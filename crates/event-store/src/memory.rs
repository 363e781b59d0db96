use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::store::{EventStore, validate_batch};
use crate::{EventEnvelope, EventStoreError, Result, TransferId, Version};

/// In-memory event store used by tests and the default binary.
///
/// The version check and the write happen under one write lock, which gives
/// the same compare-and-swap guarantee as the PostgreSQL unique constraint.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    streams: Arc<RwLock<HashMap<TransferId, Vec<EventEnvelope>>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, expected: Version, events: Vec<EventEnvelope>) -> Result<Version> {
        let transfer_id = validate_batch(expected, &events)?;

        let mut streams = self.streams.write().await;
        let stream = streams.entry(transfer_id).or_default();
        let actual = stream.last().map_or(Version::initial(), |e| e.version);

        if actual != expected {
            metrics::counter!("event_store_conflicts_total").increment(1);
            tracing::debug!(%transfer_id, %expected, %actual, "append rejected: stale version");
            return Err(EventStoreError::ConcurrencyConflict {
                transfer_id,
                expected,
                actual,
            });
        }

        stream.extend(events);
        Ok(stream.last().map_or(actual, |e| e.version))
    }

    async fn load_stream(&self, transfer_id: TransferId) -> Result<Vec<EventEnvelope>> {
        let streams = self.streams.read().await;
        Ok(streams.get(&transfer_id).cloned().unwrap_or_default())
    }
}
