use async_trait::async_trait;

use crate::{EventEnvelope, EventStoreError, Result, TransferId, Version};

/// Persistence for transfer event streams.
///
/// Every append is a compare-and-swap on the stream version: the batch lands
/// only if the stream still sits at `expected`, and either the whole batch is
/// written or nothing is.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a batch to one stream and returns the new stream version.
    ///
    /// Fails with [`EventStoreError::ConcurrencyConflict`] when the stream
    /// moved past `expected`.
    async fn append(&self, expected: Version, events: Vec<EventEnvelope>) -> Result<Version>;

    /// Returns every event of a stream in version order. Unknown transfers
    /// have an empty stream.
    async fn load_stream(&self, transfer_id: TransferId) -> Result<Vec<EventEnvelope>>;
}

/// Checks that a batch targets one stream and continues it from `expected`
/// without gaps. Returns the stream the batch belongs to.
pub(crate) fn validate_batch(expected: Version, events: &[EventEnvelope]) -> Result<TransferId> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidAppend(
            "cannot append an empty batch".to_string(),
        ));
    };

    let mut next = expected;
    for event in events {
        if event.transfer_id != first.transfer_id {
            return Err(EventStoreError::InvalidAppend(
                "all events must belong to the same transfer".to_string(),
            ));
        }
        next = next.next();
        if event.version != next {
            return Err(EventStoreError::InvalidAppend(format!(
                "expected version {next}, got {}",
                event.version
            )));
        }
    }

    Ok(first.transfer_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(transfer_id: TransferId, version: i64) -> EventEnvelope {
        EventEnvelope::builder()
            .event_type("StatusChanged")
            .transfer_id(transfer_id)
            .version(Version::new(version))
            .payload_raw(serde_json::json!({}))
            .build()
            .unwrap()
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert!(matches!(
            validate_batch(Version::initial(), &[]),
            Err(EventStoreError::InvalidAppend(_))
        ));
    }

    #[test]
    fn mixed_streams_are_rejected() {
        let batch = vec![envelope(TransferId::new(), 1), envelope(TransferId::new(), 2)];
        assert!(validate_batch(Version::initial(), &batch).is_err());
    }

    #[test]
    fn gaps_are_rejected() {
        let id = TransferId::new();
        let batch = vec![envelope(id, 1), envelope(id, 3)];
        assert!(validate_batch(Version::initial(), &batch).is_err());
    }

    #[test]
    fn batch_must_start_right_after_expected() {
        let id = TransferId::new();
        assert!(validate_batch(Version::new(4), &[envelope(id, 4)]).is_err());
        assert!(validate_batch(Version::new(4), &[envelope(id, 6)]).is_err());
    }

    #[test]
    fn consecutive_batch_is_accepted() {
        let id = TransferId::new();
        let batch = vec![envelope(id, 4), envelope(id, 5), envelope(id, 6)];
        assert_eq!(validate_batch(Version::new(3), &batch).unwrap(), id);
    }
}
