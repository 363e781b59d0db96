//! Drover availability roster.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::DroverId;
use event_store::EventStore;
use serde::{Deserialize, Serialize};
use verification::StepProgressStore;

use crate::state::AppState;

#[derive(Deserialize)]
pub struct AvailabilityRequest {
    pub available: bool,
}

#[derive(Serialize)]
pub struct AvailabilityResponse {
    pub drover_id: DroverId,
    pub available: bool,
    pub changed: bool,
}

/// PUT /drovers/{id}/availability — only available drovers receive offers.
#[tracing::instrument(skip(state, req))]
pub async fn set_availability<S: EventStore + 'static, P: StepProgressStore + 'static>(
    State(state): State<Arc<AppState<S, P>>>,
    Path(drover_id): Path<DroverId>,
    Json(req): Json<AvailabilityRequest>,
) -> Json<AvailabilityResponse> {
    let changed = state.roster.set_available(drover_id, req.available);
    if changed {
        tracing::info!(%drover_id, available = req.available, "drover availability changed");
    }
    Json(AvailabilityResponse {
        drover_id,
        available: req.available,
        changed,
    })
}
