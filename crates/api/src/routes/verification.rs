//! Pickup and delivery verification endpoints.
//!
//! Phase, step and slot names in paths use their snake_case wire names, e.g.
//! `/transfers/{id}/verification/pickup/steps/exterior_photos/slots/front`.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::TransferId;
use event_store::EventStore;
use serde::Deserialize;
use verification::{
    AdvanceOutcome, PayloadSlot, Phase, PhaseCursor, PhaseProgress, StepKey, StepProgressStore,
    StepRecord,
};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SlotRequest {
    /// Reference returned by the file storage service.
    pub reference: String,
}

/// GET /transfers/{id}/verification/{phase}
#[tracing::instrument(skip(state))]
pub async fn progress<S: EventStore + 'static, P: StepProgressStore + 'static>(
    State(state): State<Arc<AppState<S, P>>>,
    Path((id, phase)): Path<(TransferId, Phase)>,
) -> Result<Json<PhaseProgress>, ApiError> {
    Ok(Json(state.verification.progress(id, phase).await?))
}

/// PUT /transfers/{id}/verification/{phase}/steps/{step}/slots/{slot}
#[tracing::instrument(skip(state, req))]
pub async fn record_slot<S: EventStore + 'static, P: StepProgressStore + 'static>(
    State(state): State<Arc<AppState<S, P>>>,
    Path((id, phase, step, slot)): Path<(TransferId, Phase, StepKey, PayloadSlot)>,
    Json(req): Json<SlotRequest>,
) -> Result<Json<StepRecord>, ApiError> {
    let record = state
        .verification
        .record_step_payload(id, phase, step, slot, req.reference)
        .await?;
    Ok(Json(record))
}

/// DELETE /transfers/{id}/verification/{phase}/steps/{step}/slots/{slot}
#[tracing::instrument(skip(state))]
pub async fn clear_slot<S: EventStore + 'static, P: StepProgressStore + 'static>(
    State(state): State<Arc<AppState<S, P>>>,
    Path((id, phase, step, slot)): Path<(TransferId, Phase, StepKey, PayloadSlot)>,
) -> Result<Json<StepRecord>, ApiError> {
    let record = state
        .verification
        .clear_step_payload(id, phase, step, slot)
        .await?;
    Ok(Json(record))
}

/// POST /transfers/{id}/verification/{phase}/steps/{step}/reset
#[tracing::instrument(skip(state))]
pub async fn reset_step<S: EventStore + 'static, P: StepProgressStore + 'static>(
    State(state): State<Arc<AppState<S, P>>>,
    Path((id, phase, step)): Path<(TransferId, Phase, StepKey)>,
) -> Result<Json<StepRecord>, ApiError> {
    Ok(Json(state.verification.reset_step(id, phase, step).await?))
}

/// POST /transfers/{id}/verification/{phase}/advance
///
/// `422` with the missing slots while the current step is incomplete.
#[tracing::instrument(skip(state))]
pub async fn advance<S: EventStore + 'static, P: StepProgressStore + 'static>(
    State(state): State<Arc<AppState<S, P>>>,
    Path((id, phase)): Path<(TransferId, Phase)>,
) -> Result<Json<AdvanceOutcome>, ApiError> {
    Ok(Json(state.verification.advance_step(id, phase).await?))
}

/// POST /transfers/{id}/verification/{phase}/goto/{step}
#[tracing::instrument(skip(state))]
pub async fn goto_step<S: EventStore + 'static, P: StepProgressStore + 'static>(
    State(state): State<Arc<AppState<S, P>>>,
    Path((id, phase, step)): Path<(TransferId, Phase, StepKey)>,
) -> Result<Json<PhaseCursor>, ApiError> {
    Ok(Json(state.verification.skip_to_step(id, phase, step).await?))
}
