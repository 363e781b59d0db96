//! Wire payloads pushed to and received from realtime sockets.

use chrono::{DateTime, Utc};
use common::{DroverId, TransferId};
use serde::{Deserialize, Serialize};

/// Server-to-client events.
///
/// Serialized as `{"event": "<name>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum RealtimeEvent {
    /// A drover is invited to take a transfer.
    #[serde(rename = "offer")]
    Offer(OfferEvent),

    /// A previously pushed offer is no longer valid.
    #[serde(rename = "offer:retracted")]
    OfferRetracted(RetractionEvent),

    #[serde(rename = "status:changed")]
    StatusChanged(StatusChangedEvent),

    /// Every offer for a transfer ran out without a taker.
    #[serde(rename = "transfer:unassigned")]
    TransferUnassigned(UnassignedEvent),

    /// Reply to an accept/decline sent over the socket.
    #[serde(rename = "offer:result")]
    OfferResult(OfferResultEvent),
}

impl RealtimeEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            RealtimeEvent::Offer(_) => "offer",
            RealtimeEvent::OfferRetracted(_) => "offer:retracted",
            RealtimeEvent::StatusChanged(_) => "status:changed",
            RealtimeEvent::TransferUnassigned(_) => "transfer:unassigned",
            RealtimeEvent::OfferResult(_) => "offer:result",
        }
    }

    pub fn transfer_id(&self) -> TransferId {
        match self {
            RealtimeEvent::Offer(e) => e.transfer_id,
            RealtimeEvent::OfferRetracted(e) => e.transfer_id,
            RealtimeEvent::StatusChanged(e) => e.transfer_id,
            RealtimeEvent::TransferUnassigned(e) => e.transfer_id,
            RealtimeEvent::OfferResult(e) => e.transfer_id,
        }
    }
}

/// Summary a drover sees before accepting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferDetails {
    pub origin_city: String,
    pub destination_city: String,
    pub pickup_at: DateTime<Utc>,
    pub distance_m: u64,
    pub duration_s: u64,
    pub price_cents: i64,
    pub vehicle: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferEvent {
    pub transfer_id: TransferId,
    pub details: OfferDetails,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetractionEvent {
    pub transfer_id: TransferId,
}

/// Status strings use the lifecycle's snake_case names (`assigned`,
/// `picked_up`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChangedEvent {
    pub transfer_id: TransferId,
    pub from: String,
    pub to: String,
    pub drover_id: Option<DroverId>,
    pub version: i64,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnassignedReason {
    /// Offers were pushed but all expired or were declined.
    OffersExhausted,
    /// Nobody was available when the transfer was dispatched.
    NoCandidates,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnassignedEvent {
    pub transfer_id: TransferId,
    pub reason: UnassignedReason,
    pub offers_sent: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferResultOutcome {
    Accepted,
    Declined,
    AlreadyTaken,
    Expired,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferResultEvent {
    pub transfer_id: TransferId,
    pub outcome: OfferResultOutcome,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
}

/// Client-to-server socket messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    Accept { transfer_id: TransferId },
    Decline { transfer_id: TransferId },
}

impl ClientMessage {
    pub fn transfer_id(&self) -> TransferId {
        match self {
            ClientMessage::Accept { transfer_id } | ClientMessage::Decline { transfer_id } => {
                *transfer_id
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_use_colon_names_on_the_wire() {
        let event = RealtimeEvent::OfferRetracted(RetractionEvent {
            transfer_id: TransferId::new(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "offer:retracted");
        assert_eq!(event.name(), "offer:retracted");
    }

    #[test]
    fn offer_result_omits_empty_message() {
        let event = RealtimeEvent::OfferResult(OfferResultEvent {
            transfer_id: TransferId::new(),
            outcome: OfferResultOutcome::AlreadyTaken,
            message: None,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["data"]["outcome"], "already_taken");
        assert!(json["data"].get("message").is_none());
    }

    #[test]
    fn client_message_parses_accept() {
        let transfer_id = TransferId::new();
        let raw = format!(r#"{{"event":"accept","data":{{"transfer_id":"{transfer_id}"}}}}"#);
        let msg: ClientMessage = serde_json::from_str(&raw).unwrap();
        assert_eq!(msg, ClientMessage::Accept { transfer_id });
        assert_eq!(msg.transfer_id(), transfer_id);
    }

    #[test]
    fn unknown_client_message_is_rejected() {
        let raw = r#"{"event":"hijack","data":{}}"#;
        assert!(serde_json::from_str::<ClientMessage>(raw).is_err());
    }
}
