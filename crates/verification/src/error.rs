//! Verification error types.

use domain::{DomainError, TransferStatus};
use thiserror::Error;

use crate::{Phase, PayloadSlot, StepKey};

#[derive(Debug, Error)]
pub enum VerificationError {
    /// The current step (or, on phase close, some step) still has empty slots.
    #[error("step {step} of {phase} is incomplete, missing: {missing:?}")]
    StepIncomplete {
        phase: Phase,
        step: StepKey,
        missing: Vec<PayloadSlot>,
    },

    /// The transfer is not in the status that opens this phase.
    #[error("{phase} verification is closed while the transfer is {status}")]
    PhaseClosed { phase: Phase, status: TransferStatus },

    /// The phase cursor is closed; its payloads can no longer change.
    #[error("{phase} verification is sealed")]
    PhaseSealed { phase: Phase },

    #[error("step {step} has no slot {slot}")]
    UnknownSlot { step: StepKey, slot: PayloadSlot },

    #[error("step {step} is not part of {phase}")]
    UnknownStep { phase: Phase, step: StepKey },

    #[error("payload reference must not be empty")]
    EmptyPayload,

    /// Another request moved the phase cursor first.
    #[error("{phase} cursor moved concurrently")]
    CursorMoved { phase: Phase },

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("progress store error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VerificationError>;
