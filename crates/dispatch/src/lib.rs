//! Offer dispatch for new transfers.
//!
//! A `created` transfer is broadcast to every available drover as a
//! time-limited offer. The [`OfferCoordinator`] task resolves the resulting
//! accept race to a single winner, retracts the losing offers and raises an
//! admin alert when nobody takes the job.

pub mod candidates;
pub mod clock;
pub mod coordinator;
pub mod error;
pub mod offer;

pub use candidates::{CandidateSource, InMemoryDroverRoster};
pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{DispatchReport, OfferCoordinator, SweepReport};
pub use error::{DispatchError, Result};
pub use offer::{
    DEFAULT_OFFER_TTL, DEFAULT_SWEEP_INTERVAL, MAX_OFFER_TTL, MIN_OFFER_TTL, Offer, OfferLedger,
    OfferOutcome, OfferPolicy,
};
