//! Append-only, versioned event streams keyed by transfer.
//!
//! The store is the single compare-and-swap point for transfer status: every
//! append carries the version the writer loaded, and a mismatch is reported as
//! [`EventStoreError::ConcurrencyConflict`].

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::TransferId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use store::EventStore;
