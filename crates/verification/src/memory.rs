//! In-memory step progress store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::TransferId;
use tokio::sync::RwLock;

use crate::store::{PhaseCursor, StepProgressStore, StepRecord};
use crate::{PayloadSlot, Phase, Result, StepKey, VerificationError};

type StepKeyTuple = (TransferId, Phase, StepKey);

#[derive(Debug, Default)]
struct State {
    steps: HashMap<StepKeyTuple, StepRecord>,
    cursors: HashMap<(TransferId, Phase), PhaseCursor>,
}

/// Progress store for tests and the default binary. All mutations happen
/// under one write lock, so a slot write and the cursor it is checked
/// against are seen together.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStepProgressStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStepProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn mutate(
        &self,
        transfer_id: TransferId,
        phase: Phase,
        step: StepKey,
        f: impl FnOnce(&mut StepRecord),
    ) -> Result<StepRecord> {
        let mut state = self.state.write().await;
        if state
            .cursors
            .get(&(transfer_id, phase))
            .is_some_and(|cursor| cursor.closed)
        {
            return Err(VerificationError::PhaseSealed { phase });
        }
        let record = state
            .steps
            .entry((transfer_id, phase, step))
            .or_insert_with(|| StepRecord::new(transfer_id, phase, step));
        f(record);
        Ok(record.clone())
    }
}

#[async_trait]
impl StepProgressStore for InMemoryStepProgressStore {
    async fn record_slot(
        &self,
        transfer_id: TransferId,
        phase: Phase,
        step: StepKey,
        slot: PayloadSlot,
        reference: String,
    ) -> Result<StepRecord> {
        self.mutate(transfer_id, phase, step, |record| {
            record.put_slot(slot, reference)
        })
        .await
    }

    async fn clear_slot(
        &self,
        transfer_id: TransferId,
        phase: Phase,
        step: StepKey,
        slot: PayloadSlot,
    ) -> Result<StepRecord> {
        self.mutate(transfer_id, phase, step, |record| record.clear_slot(slot))
            .await
    }

    async fn reset_step(
        &self,
        transfer_id: TransferId,
        phase: Phase,
        step: StepKey,
    ) -> Result<StepRecord> {
        self.mutate(transfer_id, phase, step, StepRecord::reset)
            .await
    }

    async fn load_step(
        &self,
        transfer_id: TransferId,
        phase: Phase,
        step: StepKey,
    ) -> Result<Option<StepRecord>> {
        let state = self.state.read().await;
        Ok(state.steps.get(&(transfer_id, phase, step)).cloned())
    }

    async fn load_phase(&self, transfer_id: TransferId, phase: Phase) -> Result<Vec<StepRecord>> {
        let state = self.state.read().await;
        Ok(state
            .steps
            .values()
            .filter(|r| r.transfer_id == transfer_id && r.phase == phase)
            .cloned()
            .collect())
    }

    async fn cursor(&self, transfer_id: TransferId, phase: Phase) -> Result<PhaseCursor> {
        let state = self.state.read().await;
        Ok(state
            .cursors
            .get(&(transfer_id, phase))
            .copied()
            .unwrap_or_default())
    }

    async fn compare_and_set_cursor(
        &self,
        transfer_id: TransferId,
        phase: Phase,
        expected: PhaseCursor,
        next: PhaseCursor,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let cursor = state.cursors.entry((transfer_id, phase)).or_default();
        if *cursor != expected {
            return Ok(false);
        }
        *cursor = next;
        Ok(true)
    }
}
