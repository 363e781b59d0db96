//! Offer endpoints: the HTTP side of the dispatch race.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::{DroverId, TransferId};
use dispatch::{DispatchError, DispatchReport, Offer};
use event_store::EventStore;
use realtime::OfferResultOutcome;
use serde::{Deserialize, Serialize};
use verification::StepProgressStore;

use crate::error::ApiError;
use crate::routes::transfers::TransferResponse;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct OfferAnswerRequest {
    pub drover_id: DroverId,
}

/// Losing the race is an answer, not an error: it comes back as `200` with
/// `outcome: "already_taken"`.
#[derive(Serialize)]
pub struct OfferAnswerResponse {
    pub transfer_id: TransferId,
    pub outcome: OfferResultOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer: Option<TransferResponse>,
}

/// GET /transfers/{id}/offers
#[tracing::instrument(skip(state))]
pub async fn list<S: EventStore + 'static, P: StepProgressStore + 'static>(
    State(state): State<Arc<AppState<S, P>>>,
    Path(id): Path<TransferId>,
) -> Result<Json<Vec<Offer>>, ApiError> {
    Ok(Json(state.coordinator.offers(id).await?))
}

/// POST /transfers/{id}/offers/accept
#[tracing::instrument(skip(state, req))]
pub async fn accept<S: EventStore + 'static, P: StepProgressStore + 'static>(
    State(state): State<Arc<AppState<S, P>>>,
    Path(id): Path<TransferId>,
    Json(req): Json<OfferAnswerRequest>,
) -> Result<Json<OfferAnswerResponse>, ApiError> {
    let (outcome, transfer) = match state.coordinator.accept(id, req.drover_id).await {
        Ok(transfer) => (
            OfferResultOutcome::Accepted,
            Some(TransferResponse::from_transfer(id, &transfer)),
        ),
        Err(DispatchError::AlreadyAssigned(_)) => (OfferResultOutcome::AlreadyTaken, None),
        Err(e) => return Err(e.into()),
    };

    Ok(Json(OfferAnswerResponse {
        transfer_id: id,
        outcome,
        transfer,
    }))
}

/// POST /transfers/{id}/offers/decline
#[tracing::instrument(skip(state, req))]
pub async fn decline<S: EventStore + 'static, P: StepProgressStore + 'static>(
    State(state): State<Arc<AppState<S, P>>>,
    Path(id): Path<TransferId>,
    Json(req): Json<OfferAnswerRequest>,
) -> Result<Json<OfferAnswerResponse>, ApiError> {
    state.coordinator.decline(id, req.drover_id).await?;
    Ok(Json(OfferAnswerResponse {
        transfer_id: id,
        outcome: OfferResultOutcome::Declined,
        transfer: None,
    }))
}

/// POST /transfers/{id}/dispatch — re-broadcast, e.g. after an
/// `transfer:unassigned` alert.
#[tracing::instrument(skip(state))]
pub async fn dispatch<S: EventStore + 'static, P: StepProgressStore + 'static>(
    State(state): State<Arc<AppState<S, P>>>,
    Path(id): Path<TransferId>,
) -> Result<Json<DispatchReport>, ApiError> {
    Ok(Json(state.coordinator.dispatch(id).await?))
}
