//! Domain error types.

use common::TransferId;
use event_store::{EventStoreError, Version};
use thiserror::Error;

use crate::transfer::TransferError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("transfer not found: {0}")]
    NotFound(TransferId),

    /// The stream moved between the caller's read and this write.
    #[error("stale version for transfer {transfer_id}: expected {expected}, found {actual}")]
    StaleVersion {
        transfer_id: TransferId,
        expected: Version,
        actual: Version,
    },

    #[error(transparent)]
    Transfer(TransferError),

    #[error("event store error: {0}")]
    EventStore(EventStoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("event envelope is missing required fields")]
    IncompleteEnvelope,
}

impl From<EventStoreError> for DomainError {
    fn from(e: EventStoreError) -> Self {
        match e {
            EventStoreError::ConcurrencyConflict {
                transfer_id,
                expected,
                actual,
            } => DomainError::StaleVersion {
                transfer_id,
                expected,
                actual,
            },
            other => DomainError::EventStore(other),
        }
    }
}

impl From<TransferError> for DomainError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::NotFound(id) => DomainError::NotFound(id),
            other => DomainError::Transfer(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::TransferStatus;

    #[test]
    fn store_conflict_becomes_stale_version() {
        let transfer_id = TransferId::new();
        let err: DomainError = EventStoreError::ConcurrencyConflict {
            transfer_id,
            expected: Version::first(),
            actual: Version::new(2),
        }
        .into();

        assert!(matches!(
            err,
            DomainError::StaleVersion { transfer_id: id, .. } if id == transfer_id
        ));
    }

    #[test]
    fn transfer_not_found_is_lifted() {
        let id = TransferId::new();
        let err: DomainError = TransferError::NotFound(id).into();
        assert!(matches!(err, DomainError::NotFound(found) if found == id));
    }

    #[test]
    fn invalid_transition_stays_a_transfer_error() {
        let err: DomainError = TransferError::InvalidTransition {
            from: TransferStatus::Delivered,
            to: TransferStatus::Cancelled,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "invalid transition: delivered -> cancelled"
        );
    }
}
