//! Pub/sub boundary between the lifecycle services and connected clients.
//!
//! Producers publish a closed set of [`RealtimeEvent`]s to [`Room`]s; socket
//! sessions subscribe to the rooms of their user and role.

pub mod events;
pub mod hub;

pub use events::{
    ClientMessage, OfferDetails, OfferEvent, OfferResultEvent, OfferResultOutcome,
    RealtimeEvent, RetractionEvent, StatusChangedEvent, UnassignedEvent, UnassignedReason,
};
pub use hub::{RealtimeChannel, RealtimeHub, Room};
