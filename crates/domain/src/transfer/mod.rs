//! Transfer aggregate: the authoritative status of a vehicle transport job.

mod aggregate;
mod commands;
mod events;
mod service;
mod status;
mod value_objects;

pub use aggregate::Transfer;
pub use commands::{CreateTransfer, Transition};
pub use events::{StatusChangedData, TransferCreatedData, TransferEvent};
pub use service::{StatusChange, TransferStateMachine};
pub use status::TransferStatus;
pub use value_objects::{
    Actor, Address, Coordinates, Money, PaymentMethod, RouteEstimate, TransferDetails, Vehicle,
};

use common::TransferId;
use thiserror::Error;

/// Errors raised by the transfer aggregate.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transfer not found: {0}")]
    NotFound(TransferId),

    #[error("transfer already created")]
    AlreadyCreated,

    /// The edge is not part of the lifecycle graph.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: TransferStatus,
        to: TransferStatus,
    },

    #[error("a drover is required to enter {0}")]
    DroverRequired(TransferStatus),

    #[error("invalid transfer details: {0}")]
    InvalidDetails(String),
}
