//! The verification workflow engine.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::TransferId;
use domain::{Actor, Aggregate, Transfer, TransferStateMachine, TransferStatus, Transition};
use event_store::EventStore;
use serde::Serialize;

use crate::store::{PhaseCursor, StepProgressStore, StepRecord, missing_slots};
use crate::{PayloadSlot, Phase, Result, StepKey, VerificationError};

/// What `advance_step` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdvanceOutcome {
    /// The cursor moved to the next step.
    Moved { step: StepKey },
    /// The last step was passed; the transfer moved to `status`.
    PhaseClosed { status: TransferStatus },
}

#[derive(Debug, Clone, Serialize)]
pub struct StepProgress {
    pub step: StepKey,
    pub required: Vec<PayloadSlot>,
    pub missing: Vec<PayloadSlot>,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub slots: Vec<(PayloadSlot, String)>,
}

/// Phase report for operators and the drover app.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseProgress {
    pub transfer_id: TransferId,
    pub phase: Phase,
    pub status: TransferStatus,
    /// `None` once the phase is closed.
    pub current_step: Option<StepKey>,
    pub closed: bool,
    /// Share of required slots filled, 0-100.
    pub percent: u8,
    pub steps: Vec<StepProgress>,
}

/// Drives the ordered step sequence of each phase.
///
/// Payload writes and cursor moves are accepted only while the transfer sits
/// in the phase's open status. Passing the last step re-validates the whole
/// phase and then asks the state machine for the closing transition.
pub struct VerificationWorkflowEngine<S: EventStore, P: StepProgressStore> {
    progress: P,
    machine: Arc<TransferStateMachine<S>>,
}

impl<S: EventStore, P: StepProgressStore> VerificationWorkflowEngine<S, P> {
    pub fn new(progress: P, machine: Arc<TransferStateMachine<S>>) -> Self {
        Self { progress, machine }
    }

    pub fn progress_store(&self) -> &P {
        &self.progress
    }

    /// Upserts one slot. Idempotent; last write wins.
    #[tracing::instrument(skip(self, reference))]
    pub async fn record_step_payload(
        &self,
        transfer_id: TransferId,
        phase: Phase,
        step: StepKey,
        slot: PayloadSlot,
        reference: String,
    ) -> Result<StepRecord> {
        check_slot(phase, step, slot)?;
        if reference.trim().is_empty() {
            return Err(VerificationError::EmptyPayload);
        }
        self.open_transfer(transfer_id, phase).await?;

        let record = self
            .progress
            .record_slot(transfer_id, phase, step, slot, reference)
            .await?;
        tracing::debug!(completed = record.completed, "slot recorded");
        Ok(record)
    }

    #[tracing::instrument(skip(self))]
    pub async fn clear_step_payload(
        &self,
        transfer_id: TransferId,
        phase: Phase,
        step: StepKey,
        slot: PayloadSlot,
    ) -> Result<StepRecord> {
        check_slot(phase, step, slot)?;
        self.open_transfer(transfer_id, phase).await?;

        self.progress
            .clear_slot(transfer_id, phase, step, slot)
            .await
    }

    /// Operator reset: empties the step and, if the cursor is past it, moves
    /// the cursor back so the step has to be redone.
    #[tracing::instrument(skip(self))]
    pub async fn reset_step(
        &self,
        transfer_id: TransferId,
        phase: Phase,
        step: StepKey,
    ) -> Result<StepRecord> {
        let index = step_index(phase, step)?;
        self.open_transfer(transfer_id, phase).await?;

        let record = self.progress.reset_step(transfer_id, phase, step).await?;

        let cursor = self.progress.cursor(transfer_id, phase).await?;
        if cursor.step_index > index
            && !self
                .progress
                .compare_and_set_cursor(transfer_id, phase, cursor, PhaseCursor::at(index))
                .await?
        {
            return Err(VerificationError::CursorMoved { phase });
        }

        tracing::info!("verification step reset");
        Ok(record)
    }

    /// True iff every required slot of the current step is filled.
    pub async fn can_advance(&self, transfer_id: TransferId, phase: Phase) -> Result<bool> {
        let cursor = self.progress.cursor(transfer_id, phase).await?;
        let Some(step) = cursor.current_step(phase) else {
            return Ok(false);
        };
        Ok(self.missing(transfer_id, phase, step).await?.is_empty())
    }

    pub async fn missing(
        &self,
        transfer_id: TransferId,
        phase: Phase,
        step: StepKey,
    ) -> Result<Vec<PayloadSlot>> {
        let record = self.progress.load_step(transfer_id, phase, step).await?;
        Ok(missing_slots(step, record.as_ref()))
    }

    /// Moves past the current step, closing the phase after the last one.
    #[tracing::instrument(skip(self))]
    pub async fn advance_step(
        &self,
        transfer_id: TransferId,
        phase: Phase,
    ) -> Result<AdvanceOutcome> {
        let transfer = self.open_transfer(transfer_id, phase).await?;

        let cursor = self.progress.cursor(transfer_id, phase).await?;
        let Some(step) = cursor.current_step(phase) else {
            return Err(VerificationError::PhaseClosed {
                phase,
                status: transfer.status(),
            });
        };

        let missing = self.missing(transfer_id, phase, step).await?;
        if !missing.is_empty() {
            return Err(VerificationError::StepIncomplete {
                phase,
                step,
                missing,
            });
        }

        let next_index = cursor.step_index + 1;
        if let Some(next_step) = phase.steps().get(next_index).copied() {
            if !self
                .progress
                .compare_and_set_cursor(transfer_id, phase, cursor, PhaseCursor::at(next_index))
                .await?
            {
                return Err(VerificationError::CursorMoved { phase });
            }
            metrics::counter!(
                "verification_steps_advanced_total",
                "phase" => phase.as_str(),
                "step" => step.as_str()
            )
            .increment(1);
            tracing::info!(from = %step, to = %next_step, "verification step advanced");
            return Ok(AdvanceOutcome::Moved { step: next_step });
        }

        self.close_phase(transfer_id, &transfer, phase, cursor).await
    }

    async fn close_phase(
        &self,
        transfer_id: TransferId,
        transfer: &Transfer,
        phase: Phase,
        cursor: PhaseCursor,
    ) -> Result<AdvanceOutcome> {
        self.ensure_phase_complete(transfer_id, phase).await?;

        let closed = PhaseCursor {
            step_index: cursor.step_index,
            closed: true,
        };
        if !self
            .progress
            .compare_and_set_cursor(transfer_id, phase, cursor, closed)
            .await?
        {
            return Err(VerificationError::CursorMoved { phase });
        }

        // The closed cursor seals the phase. Anything cleared before the
        // swap is caught here.
        if let Err(e) = self.ensure_phase_complete(transfer_id, phase).await {
            self.reopen(transfer_id, phase, closed, cursor).await;
            return Err(e);
        }

        let target = phase.closing_status();
        let transition = Transition::to(transfer_id, target, Actor::System)
            .expecting(transfer.version())
            .because(format!("{phase} verification complete"));

        if let Err(e) = self.machine.transition(transition).await {
            self.reopen(transfer_id, phase, closed, cursor).await;
            return Err(e.into());
        }

        metrics::counter!(
            "verification_steps_advanced_total",
            "phase" => phase.as_str(),
            "step" => "closed"
        )
        .increment(1);
        tracing::info!(status = %target, "verification phase closed");
        Ok(AdvanceOutcome::PhaseClosed { status: target })
    }

    async fn ensure_phase_complete(&self, transfer_id: TransferId, phase: Phase) -> Result<()> {
        for step in phase.steps() {
            let missing = self.missing(transfer_id, phase, *step).await?;
            if !missing.is_empty() {
                return Err(VerificationError::StepIncomplete {
                    phase,
                    step: *step,
                    missing,
                });
            }
        }
        Ok(())
    }

    /// Undoes the close of a cursor after a failed phase close. The caller
    /// reports its own error; problems here are only logged.
    async fn reopen(
        &self,
        transfer_id: TransferId,
        phase: Phase,
        closed: PhaseCursor,
        cursor: PhaseCursor,
    ) {
        match self
            .progress
            .compare_and_set_cursor(transfer_id, phase, closed, cursor)
            .await
        {
            Ok(true) => tracing::debug!(%phase, "phase cursor reopened"),
            Ok(false) => {
                tracing::error!(%transfer_id, %phase, "phase cursor changed while closed; not reopened")
            }
            Err(e) => {
                tracing::error!(%transfer_id, %phase, error = %e, "failed to reopen phase cursor")
            }
        }
    }

    /// Moves the cursor to any step of the phase for review. Never closes the
    /// phase.
    #[tracing::instrument(skip(self))]
    pub async fn skip_to_step(
        &self,
        transfer_id: TransferId,
        phase: Phase,
        step: StepKey,
    ) -> Result<PhaseCursor> {
        let index = step_index(phase, step)?;
        let transfer = self.open_transfer(transfer_id, phase).await?;

        let cursor = self.progress.cursor(transfer_id, phase).await?;
        if cursor.closed {
            return Err(VerificationError::PhaseClosed {
                phase,
                status: transfer.status(),
            });
        }

        let next = PhaseCursor::at(index);
        if cursor != next
            && !self
                .progress
                .compare_and_set_cursor(transfer_id, phase, cursor, next)
                .await?
        {
            return Err(VerificationError::CursorMoved { phase });
        }
        Ok(next)
    }

    /// Per-step completion and missing slots. Readable in any status.
    pub async fn progress(&self, transfer_id: TransferId, phase: Phase) -> Result<PhaseProgress> {
        let transfer = self.machine.get(transfer_id).await?;
        let cursor = self.progress.cursor(transfer_id, phase).await?;
        let records = self.progress.load_phase(transfer_id, phase).await?;

        let mut required_total = 0usize;
        let mut filled_total = 0usize;
        let steps = phase
            .steps()
            .iter()
            .map(|step| {
                let record = records.iter().find(|r| r.step == *step);
                let required = step.required_slots().to_vec();
                let missing = missing_slots(*step, record);
                required_total += required.len();
                filled_total += required.len() - missing.len();

                StepProgress {
                    step: *step,
                    completed: missing.is_empty(),
                    completed_at: record.and_then(|r| r.completed_at),
                    slots: record
                        .map(|r| {
                            r.slots
                                .iter()
                                .map(|(slot, entry)| (*slot, entry.reference.clone()))
                                .collect()
                        })
                        .unwrap_or_default(),
                    required,
                    missing,
                }
            })
            .collect();

        let percent = if cursor.closed {
            100
        } else if required_total == 0 {
            0
        } else {
            (filled_total * 100 / required_total) as u8
        };

        Ok(PhaseProgress {
            transfer_id,
            phase,
            status: transfer.status(),
            current_step: cursor.current_step(phase),
            closed: cursor.closed,
            percent,
            steps,
        })
    }

    /// Loads the transfer and checks that `phase` is open for it.
    async fn open_transfer(&self, transfer_id: TransferId, phase: Phase) -> Result<Transfer> {
        let transfer = self.machine.get(transfer_id).await?;
        if transfer.status() != phase.open_status() {
            return Err(VerificationError::PhaseClosed {
                phase,
                status: transfer.status(),
            });
        }
        Ok(transfer)
    }
}

fn step_index(phase: Phase, step: StepKey) -> Result<usize> {
    phase
        .step_index(step)
        .ok_or(VerificationError::UnknownStep { phase, step })
}

fn check_slot(phase: Phase, step: StepKey, slot: PayloadSlot) -> Result<()> {
    step_index(phase, step)?;
    if !step.accepts(slot) {
        return Err(VerificationError::UnknownSlot { step, slot });
    }
    Ok(())
}
