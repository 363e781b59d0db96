//! Step progress ledger: records, cursors and the storage trait.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::TransferId;
use serde::{Deserialize, Serialize};

use crate::{PayloadSlot, Phase, Result, StepKey};

/// One captured artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotEntry {
    /// URL or id handed out by the file storage collaborator.
    pub reference: String,
    pub recorded_at: DateTime<Utc>,
}

/// Progress of one (transfer, phase, step).
///
/// Records are created lazily on the first write. `completed` is derived
/// from the slots on every mutation, so it flips to true only once every
/// required slot is filled and back to false only when one is cleared or the
/// step is reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub transfer_id: TransferId,
    pub phase: Phase,
    pub step: StepKey,
    pub slots: BTreeMap<PayloadSlot, SlotEntry>,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl StepRecord {
    pub fn new(transfer_id: TransferId, phase: Phase, step: StepKey) -> Self {
        Self {
            transfer_id,
            phase,
            step,
            slots: BTreeMap::new(),
            completed: false,
            completed_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Required slots without a reference, in schema order.
    pub fn missing(&self) -> Vec<PayloadSlot> {
        missing_slots(self.step, Some(self))
    }

    /// Last write wins.
    pub fn put_slot(&mut self, slot: PayloadSlot, reference: String) {
        let now = Utc::now();
        self.slots.insert(
            slot,
            SlotEntry {
                reference,
                recorded_at: now,
            },
        );
        self.touch(now);
    }

    pub fn clear_slot(&mut self, slot: PayloadSlot) {
        self.slots.remove(&slot);
        self.touch(Utc::now());
    }

    pub fn reset(&mut self) {
        self.slots.clear();
        self.touch(Utc::now());
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        let complete = self.missing().is_empty();
        match (self.completed, complete) {
            (false, true) => self.completed_at = Some(now),
            (true, false) => self.completed_at = None,
            _ => {}
        }
        self.completed = complete;
        self.updated_at = now;
    }
}

/// Required slots of `step` not present in `record`.
pub fn missing_slots(step: StepKey, record: Option<&StepRecord>) -> Vec<PayloadSlot> {
    step.required_slots()
        .iter()
        .copied()
        .filter(|slot| {
            record
                .and_then(|r| r.slots.get(slot))
                .is_none_or(|entry| entry.reference.trim().is_empty())
        })
        .collect()
}

/// Current-step pointer of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PhaseCursor {
    /// Index into [`Phase::steps`].
    pub step_index: usize,
    /// Set once the last step was advanced past and the transfer moved on.
    pub closed: bool,
}

impl PhaseCursor {
    pub fn at(step_index: usize) -> Self {
        Self {
            step_index,
            closed: false,
        }
    }

    pub fn current_step(&self, phase: Phase) -> Option<StepKey> {
        if self.closed {
            return None;
        }
        phase.steps().get(self.step_index).copied()
    }
}

/// Storage for step progress and phase cursors.
///
/// Slot mutations must be atomic per step record; cursor moves must be
/// compare-and-set.
#[async_trait]
pub trait StepProgressStore: Send + Sync {
    /// Upserts one slot and returns the record after the write.
    async fn record_slot(
        &self,
        transfer_id: TransferId,
        phase: Phase,
        step: StepKey,
        slot: PayloadSlot,
        reference: String,
    ) -> Result<StepRecord>;

    async fn clear_slot(
        &self,
        transfer_id: TransferId,
        phase: Phase,
        step: StepKey,
        slot: PayloadSlot,
    ) -> Result<StepRecord>;

    /// Drops every slot of a step.
    async fn reset_step(
        &self,
        transfer_id: TransferId,
        phase: Phase,
        step: StepKey,
    ) -> Result<StepRecord>;

    async fn load_step(
        &self,
        transfer_id: TransferId,
        phase: Phase,
        step: StepKey,
    ) -> Result<Option<StepRecord>>;

    /// Every stored record of a phase, in no particular order.
    async fn load_phase(&self, transfer_id: TransferId, phase: Phase) -> Result<Vec<StepRecord>>;

    /// Returns the default cursor when none was stored yet.
    async fn cursor(&self, transfer_id: TransferId, phase: Phase) -> Result<PhaseCursor>;

    /// Replaces the cursor only if it still equals `expected`. Returns whether
    /// the swap happened.
    async fn compare_and_set_cursor(
        &self,
        transfer_id: TransferId,
        phase: Phase,
        expected: PhaseCursor,
        next: PhaseCursor,
    ) -> Result<bool>;
}
