//! Dispatch error types.

use common::{DroverId, TransferId};
use domain::{DomainError, TransferStatus};
use thiserror::Error;

/// Errors returned by the [`OfferCoordinator`](crate::OfferCoordinator).
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Another drover won the transfer, or it left `created` before the
    /// accept was processed. Callers show this as "already taken".
    #[error("transfer {0} is already taken")]
    AlreadyAssigned(TransferId),

    /// The drover holds no live offer for this transfer.
    #[error("no live offer for drover {drover_id} on transfer {transfer_id}")]
    OfferExpired {
        transfer_id: TransferId,
        drover_id: DroverId,
    },

    /// Offers can only be broadcast for transfers in `created`.
    #[error("transfer {transfer_id} cannot be dispatched while {status}")]
    NotDispatchable {
        transfer_id: TransferId,
        status: TransferStatus,
    },

    /// More than one offer of a transfer reached `accepted`.
    #[error("integrity violation on transfer {transfer_id}: {accepted} accepted offers")]
    IntegrityViolation {
        transfer_id: TransferId,
        accepted: usize,
    },

    /// The candidate source could not produce a drover list.
    #[error("candidate source error: {0}")]
    Candidates(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The coordinator task has stopped.
    #[error("offer coordinator is not running")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, DispatchError>;
