//! Transfer commands.

use common::{DroverId, TransferId, UserId};
use event_store::Version;

use crate::command::Command;

use super::{Actor, Transfer, TransferDetails, TransferStatus};

#[derive(Debug, Clone)]
pub struct CreateTransfer {
    pub transfer_id: TransferId,
    pub client_id: UserId,
    pub details: TransferDetails,
    /// Starts in `PendingPaid` instead of `Created`.
    pub requires_payment: bool,
}

impl CreateTransfer {
    /// Payment capture follows the payment method.
    pub fn new(client_id: UserId, details: TransferDetails) -> Self {
        Self {
            transfer_id: TransferId::new(),
            client_id,
            requires_payment: details.payment_method.requires_capture(),
            details,
        }
    }

    pub fn with_id(mut self, transfer_id: TransferId) -> Self {
        self.transfer_id = transfer_id;
        self
    }

    pub fn requires_payment(mut self, required: bool) -> Self {
        self.requires_payment = required;
        self
    }
}

impl Command for CreateTransfer {
    type Aggregate = Transfer;

    fn transfer_id(&self) -> TransferId {
        self.transfer_id
    }
}

/// A request to move a transfer to `target`.
///
/// This is the only command that changes status after creation.
#[derive(Debug, Clone)]
pub struct Transition {
    pub transfer_id: TransferId,
    pub target: TransferStatus,
    pub actor: Actor,
    /// Version the caller read; `None` only checks against the replayed
    /// stream.
    pub expected_version: Option<Version>,
    /// Required when `target` is `Assigned`.
    pub drover_id: Option<DroverId>,
    pub reason: Option<String>,
}

impl Transition {
    pub fn to(transfer_id: TransferId, target: TransferStatus, actor: Actor) -> Self {
        Self {
            transfer_id,
            target,
            actor,
            expected_version: None,
            drover_id: None,
            reason: None,
        }
    }

    pub fn expecting(mut self, version: Version) -> Self {
        self.expected_version = Some(version);
        self
    }

    pub fn with_drover(mut self, drover_id: DroverId) -> Self {
        self.drover_id = Some(drover_id);
        self
    }

    pub fn because(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

impl Command for Transition {
    type Aggregate = Transfer;

    fn transfer_id(&self) -> TransferId {
        self.transfer_id
    }
}
