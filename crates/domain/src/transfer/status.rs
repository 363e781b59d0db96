//! Transfer lifecycle states.

use serde::{Deserialize, Serialize};

/// The status of a transfer.
///
/// ```text
/// PendingPaid ──► Created ──► Assigned ──► PickedUp ──► InProgress ──► RequestFinish ──► Delivered
///      │             │           │            │             │                │
///      └─────────────┴───────────┴────────────┴─────────────┴────────────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Open for dispatch.
    #[default]
    Created,

    /// Waiting for payment capture before dispatch.
    PendingPaid,

    Assigned,

    /// Pickup verification completed; vehicle is with the drover.
    PickedUp,

    InProgress,

    /// Drover arrived; delivery verification is open.
    RequestFinish,

    Delivered,

    Cancelled,
}

impl TransferStatus {
    pub const ALL: [TransferStatus; 8] = [
        TransferStatus::Created,
        TransferStatus::PendingPaid,
        TransferStatus::Assigned,
        TransferStatus::PickedUp,
        TransferStatus::InProgress,
        TransferStatus::RequestFinish,
        TransferStatus::Delivered,
        TransferStatus::Cancelled,
    ];

    /// Returns true if `target` is a legal next status.
    pub fn can_transition_to(&self, target: TransferStatus) -> bool {
        use TransferStatus::*;

        match (self, target) {
            (PendingPaid, Created) => true,
            (Created, Assigned) => true,
            (Assigned, PickedUp) => true,
            (PickedUp, InProgress) => true,
            (InProgress, RequestFinish) => true,
            (RequestFinish, Delivered) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Delivered | TransferStatus::Cancelled)
    }

    /// Statuses in which exactly one drover must be assigned.
    pub fn requires_drover(&self) -> bool {
        matches!(
            self,
            TransferStatus::Assigned
                | TransferStatus::PickedUp
                | TransferStatus::InProgress
                | TransferStatus::RequestFinish
                | TransferStatus::Delivered
        )
    }

    pub fn is_dispatchable(&self) -> bool {
        matches!(self, TransferStatus::Created)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Created => "created",
            TransferStatus::PendingPaid => "pending_paid",
            TransferStatus::Assigned => "assigned",
            TransferStatus::PickedUp => "picked_up",
            TransferStatus::InProgress => "in_progress",
            TransferStatus::RequestFinish => "request_finish",
            TransferStatus::Delivered => "delivered",
            TransferStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
