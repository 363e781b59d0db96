//! Domain layer for the transfer lifecycle.
//!
//! - [`Aggregate`] / [`DomainEvent`] traits for event-sourced entities
//! - [`CommandHandler`] to replay, decide and append with a version guard
//! - the [`Transfer`] aggregate and its [`TransferStateMachine`]

pub mod aggregate;
pub mod command;
pub mod error;
pub mod transfer;

pub use aggregate::{Aggregate, DomainEvent};
pub use command::{Command, CommandHandler, CommandResult};
pub use error::DomainError;
pub use transfer::{
    Actor, Address, Coordinates, CreateTransfer, Money, PaymentMethod, RouteEstimate,
    StatusChange, StatusChangedData, Transfer, TransferCreatedData, TransferDetails,
    TransferError, TransferEvent, TransferStateMachine, TransferStatus, Transition, Vehicle,
};
