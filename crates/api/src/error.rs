//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dispatch::DispatchError;
use domain::{DomainError, TransferError};
use serde_json::json;
use verification::VerificationError;

/// API-level error type that maps to HTTP responses.
///
/// Bodies are `{"error": "..."}`; an incomplete verification step also
/// carries the `missing` slot list.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Domain(DomainError),
    Dispatch(DispatchError),
    Verification(VerificationError),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::Domain(err) => with_message(domain_status(&err), &err),
            ApiError::Dispatch(err) => with_message(dispatch_status(&err), &err),
            ApiError::Verification(err) => verification_response(err),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg })),
        };

        if status.is_server_error() {
            tracing::error!(%status, error = %body["error"], "request failed");
        }
        (status, axum::Json(body)).into_response()
    }
}

fn with_message(status: StatusCode, err: &dyn std::error::Error) -> (StatusCode, serde_json::Value) {
    (status, json!({ "error": err.to_string() }))
}

fn domain_status(err: &DomainError) -> StatusCode {
    match err {
        DomainError::NotFound(_) => StatusCode::NOT_FOUND,
        DomainError::StaleVersion { .. } => StatusCode::CONFLICT,
        DomainError::Transfer(transfer_err) => match transfer_err {
            TransferError::InvalidTransition { .. } | TransferError::AlreadyCreated => {
                StatusCode::CONFLICT
            }
            TransferError::NotFound(_) => StatusCode::NOT_FOUND,
            TransferError::DroverRequired(_) | TransferError::InvalidDetails(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
        },
        DomainError::EventStore(_)
        | DomainError::Serialization(_)
        | DomainError::IncompleteEnvelope => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn dispatch_status(err: &DispatchError) -> StatusCode {
    match err {
        DispatchError::AlreadyAssigned(_) | DispatchError::NotDispatchable { .. } => {
            StatusCode::CONFLICT
        }
        DispatchError::OfferExpired { .. } => StatusCode::GONE,
        DispatchError::Domain(err) => domain_status(err),
        DispatchError::Candidates(_) | DispatchError::ChannelClosed => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        DispatchError::IntegrityViolation { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn verification_response(err: VerificationError) -> (StatusCode, serde_json::Value) {
    match &err {
        VerificationError::StepIncomplete {
            phase,
            step,
            missing,
        } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({
                "error": err.to_string(),
                "phase": phase,
                "step": step,
                "missing": missing,
            }),
        ),
        VerificationError::PhaseClosed { .. }
        | VerificationError::PhaseSealed { .. }
        | VerificationError::CursorMoved { .. } => with_message(StatusCode::CONFLICT, &err),
        VerificationError::UnknownSlot { .. }
        | VerificationError::UnknownStep { .. }
        | VerificationError::EmptyPayload => with_message(StatusCode::BAD_REQUEST, &err),
        VerificationError::Domain(domain_err) => with_message(domain_status(domain_err), &err),
        VerificationError::Database(_) | VerificationError::Serialization(_) => {
            with_message(StatusCode::INTERNAL_SERVER_ERROR, &err)
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        ApiError::Dispatch(err)
    }
}

impl From<VerificationError> for ApiError {
    fn from(err: VerificationError) -> Self {
        ApiError::Verification(err)
    }
}
