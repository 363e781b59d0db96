//! Transfer aggregate implementation.

use chrono::{DateTime, Utc};
use common::{DroverId, TransferId, UserId};
use event_store::Version;

use crate::aggregate::Aggregate;

use super::{
    Actor, StatusChangedData, TransferCreatedData, TransferDetails, TransferError, TransferEvent,
    TransferStatus,
};

/// A vehicle transport job.
///
/// State is only ever changed by applying [`TransferEvent`]s; the command
/// methods decide which events to emit.
#[derive(Debug, Clone, Default)]
pub struct Transfer {
    id: Option<TransferId>,
    client_id: Option<UserId>,
    details: Option<TransferDetails>,
    status: TransferStatus,
    drover_id: Option<DroverId>,
    version: Version,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl Aggregate for Transfer {
    type Event = TransferEvent;
    type Error = TransferError;

    fn aggregate_type() -> &'static str {
        "Transfer"
    }

    fn id(&self) -> Option<TransferId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            TransferEvent::TransferCreated(data) => self.apply_created(data),
            TransferEvent::StatusChanged(data) => self.apply_status_changed(data),
        }
    }
}

// Queries
impl Transfer {
    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn client_id(&self) -> Option<UserId> {
        self.client_id
    }

    pub fn drover_id(&self) -> Option<DroverId> {
        self.drover_id
    }

    pub fn details(&self) -> Option<&TransferDetails> {
        self.details.as_ref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// Commands
impl Transfer {
    pub fn create(
        &self,
        transfer_id: TransferId,
        client_id: UserId,
        details: TransferDetails,
        requires_payment: bool,
    ) -> Result<Vec<TransferEvent>, TransferError> {
        if self.id.is_some() {
            return Err(TransferError::AlreadyCreated);
        }
        details.validate().map_err(TransferError::InvalidDetails)?;

        let status = if requires_payment {
            TransferStatus::PendingPaid
        } else {
            TransferStatus::Created
        };

        Ok(vec![TransferEvent::transfer_created(
            transfer_id,
            client_id,
            details,
            status,
        )])
    }

    /// Decides the event for a move to `target`.
    ///
    /// `drover_id` is only read when entering `Assigned`; every other move
    /// keeps the current drover, except `Cancelled` which releases it.
    pub fn transition(
        &self,
        target: TransferStatus,
        actor: Actor,
        drover_id: Option<DroverId>,
        reason: Option<String>,
    ) -> Result<Vec<TransferEvent>, TransferError> {
        if !self.status.can_transition_to(target) {
            return Err(TransferError::InvalidTransition {
                from: self.status,
                to: target,
            });
        }

        let next_drover = match target {
            TransferStatus::Assigned => {
                Some(drover_id.ok_or(TransferError::DroverRequired(target))?)
            }
            TransferStatus::Cancelled => None,
            _ => self.drover_id,
        };

        if target.requires_drover() && next_drover.is_none() {
            return Err(TransferError::DroverRequired(target));
        }

        Ok(vec![TransferEvent::status_changed(
            self.status,
            target,
            actor,
            next_drover,
            reason,
        )])
    }
}

// Event application
impl Transfer {
    fn apply_created(&mut self, data: TransferCreatedData) {
        self.id = Some(data.transfer_id);
        self.client_id = Some(data.client_id);
        self.details = Some(data.details);
        self.status = data.status;
        self.created_at = Some(data.created_at);
        self.updated_at = Some(data.created_at);
    }

    fn apply_status_changed(&mut self, data: StatusChangedData) {
        self.status = data.to;
        self.drover_id = data.drover_id;
        self.updated_at = Some(data.changed_at);
    }
}
