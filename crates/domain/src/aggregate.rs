//! Core aggregate and domain event traits.

use common::TransferId;
use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events are facts; they are named in past tense and never change
/// once stored.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Event name stored alongside the payload.
    fn event_type(&self) -> &'static str;
}

/// Trait for event-sourced aggregates.
///
/// An aggregate is rebuilt by replaying its stream. `apply` must be pure and
/// infallible: events describe things that already happened.
pub trait Aggregate: Default + Send + Sync + Sized {
    type Event: DomainEvent;

    type Error: std::error::Error + Send + Sync;

    fn aggregate_type() -> &'static str;

    /// Returns `None` until the creation event has been applied.
    fn id(&self) -> Option<TransferId>;

    /// Stream version the aggregate was rebuilt from. `0` when new.
    fn version(&self) -> Version;

    fn set_version(&mut self, version: Version);

    fn apply(&mut self, event: Self::Event);

    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }
}
