//! Transfer lifecycle endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{DroverId, TransferId, UserId};
use domain::{
    Actor, Aggregate, CreateTransfer, StatusChange, Transfer, TransferDetails, TransferStatus,
};
use event_store::EventStore;
use serde::{Deserialize, Serialize};
use verification::StepProgressStore;

use crate::error::ApiError;
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateTransferRequest {
    pub client_id: UserId,
    pub details: TransferDetails,
    /// Overrides the payment method's default.
    pub requires_payment: Option<bool>,
}

/// Body of endpoints that only need to know who is acting. An empty body
/// acts as the system.
#[derive(Deserialize)]
pub struct ActorRequest {
    pub actor: Option<Actor>,
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub drover_id: DroverId,
    pub admin_id: UserId,
}

#[derive(Deserialize)]
pub struct DroverRequest {
    pub drover_id: DroverId,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub actor: Actor,
    pub reason: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct TransferResponse {
    pub id: TransferId,
    pub client_id: Option<UserId>,
    pub status: TransferStatus,
    pub drover_id: Option<DroverId>,
    pub version: i64,
    pub details: Option<TransferDetails>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TransferResponse {
    pub fn from_transfer(id: TransferId, transfer: &Transfer) -> Self {
        Self {
            id,
            client_id: transfer.client_id(),
            status: transfer.status(),
            drover_id: transfer.drover_id(),
            version: transfer.version().as_i64(),
            details: transfer.details().cloned(),
            created_at: transfer.created_at(),
            updated_at: transfer.updated_at(),
        }
    }
}

#[derive(Serialize)]
pub struct TransferCreatedResponse {
    #[serde(flatten)]
    pub transfer: TransferResponse,
    /// Drovers that were sent an offer right away.
    pub offered: Vec<DroverId>,
}

// -- Handlers --

/// POST /transfers — create a transfer; a `created` one is dispatched at once.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: EventStore + 'static, P: StepProgressStore + 'static>(
    State(state): State<Arc<AppState<S, P>>>,
    Json(req): Json<CreateTransferRequest>,
) -> Result<(StatusCode, Json<TransferCreatedResponse>), ApiError> {
    let mut cmd = CreateTransfer::new(req.client_id, req.details);
    if let Some(required) = req.requires_payment {
        cmd = cmd.requires_payment(required);
    }
    let transfer_id = cmd.transfer_id;
    let result = state.machine.create(cmd).await?;

    let offered = if result.aggregate.status() == TransferStatus::Created {
        dispatch_quietly(&state, transfer_id).await
    } else {
        Vec::new()
    };

    Ok((
        StatusCode::CREATED,
        Json(TransferCreatedResponse {
            transfer: TransferResponse::from_transfer(transfer_id, &result.aggregate),
            offered,
        }),
    ))
}

/// GET /transfers/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: EventStore + 'static, P: StepProgressStore + 'static>(
    State(state): State<Arc<AppState<S, P>>>,
    Path(id): Path<TransferId>,
) -> Result<Json<TransferResponse>, ApiError> {
    let transfer = state
        .machine
        .find(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("transfer {id} not found")))?;
    Ok(Json(TransferResponse::from_transfer(id, &transfer)))
}

/// GET /transfers/{id}/history — every status the transfer went through.
#[tracing::instrument(skip(state))]
pub async fn history<S: EventStore + 'static, P: StepProgressStore + 'static>(
    State(state): State<Arc<AppState<S, P>>>,
    Path(id): Path<TransferId>,
) -> Result<Json<Vec<StatusChange>>, ApiError> {
    Ok(Json(state.machine.history(id).await?))
}

/// POST /transfers/{id}/payment — payment captured; dispatches the transfer.
#[tracing::instrument(skip(state, req))]
pub async fn confirm_payment<S: EventStore + 'static, P: StepProgressStore + 'static>(
    State(state): State<Arc<AppState<S, P>>>,
    Path(id): Path<TransferId>,
    req: Option<Json<ActorRequest>>,
) -> Result<Json<TransferCreatedResponse>, ApiError> {
    let actor = req.and_then(|Json(r)| r.actor).unwrap_or(Actor::System);
    let result = state.machine.confirm_payment(id, actor).await?;
    let offered = dispatch_quietly(&state, id).await;

    Ok(Json(TransferCreatedResponse {
        transfer: TransferResponse::from_transfer(id, &result.aggregate),
        offered,
    }))
}

/// POST /transfers/{id}/assign — admin override; withdraws pending offers.
#[tracing::instrument(skip(state, req))]
pub async fn assign<S: EventStore + 'static, P: StepProgressStore + 'static>(
    State(state): State<Arc<AppState<S, P>>>,
    Path(id): Path<TransferId>,
    Json(req): Json<AssignRequest>,
) -> Result<Json<TransferResponse>, ApiError> {
    let transfer = state
        .coordinator
        .assign_override(id, req.drover_id, Actor::Admin(req.admin_id))
        .await?;
    Ok(Json(TransferResponse::from_transfer(id, &transfer)))
}

/// POST /transfers/{id}/depart — the drover leaves with the vehicle.
#[tracing::instrument(skip(state, req))]
pub async fn depart<S: EventStore + 'static, P: StepProgressStore + 'static>(
    State(state): State<Arc<AppState<S, P>>>,
    Path(id): Path<TransferId>,
    Json(req): Json<DroverRequest>,
) -> Result<Json<TransferResponse>, ApiError> {
    ensure_assigned_drover(&state, id, req.drover_id).await?;
    let result = state
        .machine
        .depart(id, Actor::Drover(req.drover_id))
        .await?;
    Ok(Json(TransferResponse::from_transfer(id, &result.aggregate)))
}

/// POST /transfers/{id}/arrive — the drover reached the destination.
#[tracing::instrument(skip(state, req))]
pub async fn arrive<S: EventStore + 'static, P: StepProgressStore + 'static>(
    State(state): State<Arc<AppState<S, P>>>,
    Path(id): Path<TransferId>,
    Json(req): Json<DroverRequest>,
) -> Result<Json<TransferResponse>, ApiError> {
    ensure_assigned_drover(&state, id, req.drover_id).await?;
    let result = state
        .machine
        .request_finish(id, Actor::Drover(req.drover_id))
        .await?;
    Ok(Json(TransferResponse::from_transfer(id, &result.aggregate)))
}

/// POST /transfers/{id}/cancel
#[tracing::instrument(skip(state, req))]
pub async fn cancel<S: EventStore + 'static, P: StepProgressStore + 'static>(
    State(state): State<Arc<AppState<S, P>>>,
    Path(id): Path<TransferId>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<TransferResponse>, ApiError> {
    let transfer = state
        .coordinator
        .cancel_transfer(id, req.actor, req.reason)
        .await?;
    Ok(Json(TransferResponse::from_transfer(id, &transfer)))
}

async fn ensure_assigned_drover<S: EventStore + 'static, P: StepProgressStore + 'static>(
    state: &AppState<S, P>,
    id: TransferId,
    drover_id: DroverId,
) -> Result<(), ApiError> {
    let transfer = state.machine.get(id).await?;
    match transfer.drover_id() {
        Some(assigned) if assigned == drover_id => Ok(()),
        _ => Err(ApiError::BadRequest(format!(
            "drover {drover_id} is not assigned to transfer {id}"
        ))),
    }
}

/// Broadcasts a freshly `created` transfer. A failed broadcast does not fail
/// the request; operations can re-dispatch.
async fn dispatch_quietly<S: EventStore + 'static, P: StepProgressStore + 'static>(
    state: &AppState<S, P>,
    id: TransferId,
) -> Vec<DroverId> {
    match state.coordinator.dispatch(id).await {
        Ok(report) => report.offered,
        Err(e) => {
            tracing::warn!(transfer_id = %id, error = %e, "dispatch after status change failed");
            Vec::new()
        }
    }
}
