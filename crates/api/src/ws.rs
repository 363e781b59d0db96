//! Realtime socket gateway.
//!
//! A socket joins the room of its user and the room of its role. Drovers may
//! answer offers over the socket; each answer gets an `offer:result` reply on
//! the same socket.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use common::{Role, TransferId, UserId};
use dispatch::{DispatchError, OfferCoordinator};
use event_store::EventStore;
use futures_util::{SinkExt, StreamExt};
use realtime::{
    ClientMessage, OfferResultEvent, OfferResultOutcome, RealtimeEvent, RealtimeHub, Room,
};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use verification::StepProgressStore;

use crate::state::AppState;

const REPLY_BUFFER: usize = 32;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub user_id: UserId,
    pub role: Role,
}

/// GET /ws?user_id=&role= — upgrades to a realtime socket.
pub async fn connect<S: EventStore + 'static, P: StepProgressStore + 'static>(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState<S, P>>>,
) -> impl IntoResponse {
    let hub = state.hub.clone();
    let coordinator = state.coordinator.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, params, hub, coordinator))
}

async fn handle_socket(
    socket: WebSocket,
    params: ConnectParams,
    hub: RealtimeHub,
    coordinator: OfferCoordinator,
) {
    let ConnectParams { user_id, role } = params;
    let mut user_rx = hub.subscribe(Room::User(user_id));
    let mut role_rx = hub.subscribe(Room::Role(role));
    tracing::info!(%user_id, %role, "socket connected");
    metrics::gauge!("realtime_sockets_connected").increment(1.0);

    let (mut sink, mut stream) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<RealtimeEvent>(REPLY_BUFFER);

    // Sender task: room events and direct replies go out in arrival order.
    let send_task = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                event = next_room_event(&mut user_rx) => event,
                event = next_room_event(&mut role_rx) => event,
                Some(event) = reply_rx.recv() => Some(event),
            };
            let Some(event) = event else {
                break;
            };
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode realtime event");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                tracing::debug!(%user_id, "socket sink closed");
                break;
            }
        }
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let Some(reply) = answer(&coordinator, user_id, role, text.as_str()).await else {
                    continue;
                };
                if reply_tx.send(reply).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(%user_id, error = %e, "socket receive error");
                break;
            }
        }
    }

    // The receivers live in the sender task; wait for it to drop them.
    send_task.abort();
    let _ = send_task.await;
    let pruned = hub.prune();

    metrics::gauge!("realtime_sockets_connected").decrement(1.0);
    tracing::info!(%user_id, pruned, "socket disconnected");
}

/// Waits for the next event of a room, skipping over lag. `None` once the
/// room is gone.
async fn next_room_event(rx: &mut broadcast::Receiver<RealtimeEvent>) -> Option<RealtimeEvent> {
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "socket fell behind its room");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

/// Handles one inbound frame. Frames that are not offer answers are ignored.
async fn answer(
    coordinator: &OfferCoordinator,
    user_id: UserId,
    role: Role,
    text: &str,
) -> Option<RealtimeEvent> {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(%user_id, error = %e, "ignoring unrecognised socket frame");
            return None;
        }
    };
    let transfer_id = message.transfer_id();

    if role != Role::Drover {
        return Some(offer_result(
            transfer_id,
            OfferResultOutcome::Error,
            Some("only drovers can answer offers".to_string()),
        ));
    }

    let result = match message {
        ClientMessage::Accept { .. } => coordinator
            .accept(transfer_id, user_id)
            .await
            .map(|_| OfferResultOutcome::Accepted),
        ClientMessage::Decline { .. } => coordinator
            .decline(transfer_id, user_id)
            .await
            .map(|_| OfferResultOutcome::Declined),
    };

    let reply = match result {
        Ok(outcome) => offer_result(transfer_id, outcome, None),
        Err(DispatchError::AlreadyAssigned(_)) => {
            offer_result(transfer_id, OfferResultOutcome::AlreadyTaken, None)
        }
        Err(DispatchError::OfferExpired { .. }) => {
            offer_result(transfer_id, OfferResultOutcome::Expired, None)
        }
        Err(e) => offer_result(transfer_id, OfferResultOutcome::Error, Some(e.to_string())),
    };
    Some(reply)
}

fn offer_result(
    transfer_id: TransferId,
    outcome: OfferResultOutcome,
    message: Option<String>,
) -> RealtimeEvent {
    RealtimeEvent::OfferResult(OfferResultEvent {
        transfer_id,
        outcome,
        message,
    })
}
