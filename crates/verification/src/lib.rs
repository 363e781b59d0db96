//! Pickup and delivery verification.
//!
//! Each phase is an ordered list of steps; each step has a fixed set of
//! payload slots. The [`VerificationWorkflowEngine`] only lets the cursor move
//! past a step once its required slots are filled, and closing a phase is
//! what moves the transfer to `PickedUp` or `Delivered`.

pub mod engine;
pub mod error;
pub mod memory;
pub mod phase;
pub mod postgres;
pub mod store;

pub use engine::{AdvanceOutcome, PhaseProgress, StepProgress, VerificationWorkflowEngine};
pub use error::{Result, VerificationError};
pub use memory::InMemoryStepProgressStore;
pub use phase::{PayloadSlot, Phase, StepKey};
pub use postgres::PostgresStepProgressStore;
pub use store::{PhaseCursor, SlotEntry, StepProgressStore, StepRecord};
