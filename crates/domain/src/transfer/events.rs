//! Transfer domain events.

use chrono::{DateTime, Utc};
use common::{DroverId, TransferId, UserId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::{Actor, TransferDetails, TransferStatus};

/// Events stored in a transfer stream.
///
/// `StatusChanged` is the only event that moves the status after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TransferEvent {
    TransferCreated(TransferCreatedData),
    StatusChanged(StatusChangedData),
}

impl DomainEvent for TransferEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransferEvent::TransferCreated(_) => "TransferCreated",
            TransferEvent::StatusChanged(_) => "StatusChanged",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferCreatedData {
    pub transfer_id: TransferId,
    pub client_id: UserId,
    pub details: TransferDetails,
    /// `Created`, or `PendingPaid` when payment must be captured first.
    pub status: TransferStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChangedData {
    pub from: TransferStatus,
    pub to: TransferStatus,
    pub actor: Actor,
    /// Drover assigned after the change; `None` once cancelled.
    pub drover_id: Option<DroverId>,
    pub reason: Option<String>,
    pub changed_at: DateTime<Utc>,
}

impl TransferEvent {
    pub fn transfer_created(
        transfer_id: TransferId,
        client_id: UserId,
        details: TransferDetails,
        status: TransferStatus,
    ) -> Self {
        TransferEvent::TransferCreated(TransferCreatedData {
            transfer_id,
            client_id,
            details,
            status,
            created_at: Utc::now(),
        })
    }

    pub fn status_changed(
        from: TransferStatus,
        to: TransferStatus,
        actor: Actor,
        drover_id: Option<DroverId>,
        reason: Option<String>,
    ) -> Self {
        TransferEvent::StatusChanged(StatusChangedData {
            from,
            to,
            actor,
            drover_id,
            reason,
            changed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_changed_wire_shape() {
        let event = TransferEvent::status_changed(
            TransferStatus::Created,
            TransferStatus::Assigned,
            Actor::System,
            Some(UserId::new()),
            None,
        );
        assert_eq!(event.event_type(), "StatusChanged");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "StatusChanged");
        assert_eq!(json["data"]["from"], "created");
        assert_eq!(json["data"]["to"], "assigned");

        let back: TransferEvent = serde_json::from_value(json).unwrap();
        assert!(matches!(
            back,
            TransferEvent::StatusChanged(StatusChangedData {
                to: TransferStatus::Assigned,
                ..
            })
        ));
    }
}
