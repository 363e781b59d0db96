//! The transfer state machine: the single writer of transfer status.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use common::{DroverId, Role, TransferId};
use event_store::{EventStore, Version};
use realtime::{RealtimeChannel, RealtimeEvent, Room, StatusChangedEvent};
use serde::Serialize;

use crate::aggregate::Aggregate;
use crate::command::{CommandHandler, CommandResult};
use crate::error::DomainError;

use super::{
    Actor, CreateTransfer, Transfer, TransferError, TransferEvent, TransferStatus, Transition,
};

/// One entry of a transfer's audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    pub version: Version,
    /// `None` for the creation entry.
    pub from: Option<TransferStatus>,
    pub to: TransferStatus,
    pub actor: Actor,
    pub drover_id: Option<DroverId>,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// Owns the authoritative status of every transfer.
///
/// All status writes go through [`transition`](Self::transition); the
/// helpers below only build a [`Transition`] for it.
pub struct TransferStateMachine<S: EventStore> {
    handler: CommandHandler<S, Transfer>,
    channel: Arc<dyn RealtimeChannel>,
}

impl<S: EventStore> TransferStateMachine<S> {
    pub fn new(store: S, channel: Arc<dyn RealtimeChannel>) -> Self {
        Self {
            handler: CommandHandler::new(store),
            channel,
        }
    }

    pub fn handler(&self) -> &CommandHandler<S, Transfer> {
        &self.handler
    }

    #[tracing::instrument(skip(self, cmd), fields(transfer_id = %cmd.transfer_id))]
    pub async fn create(&self, cmd: CreateTransfer) -> Result<CommandResult<Transfer>, DomainError> {
        let CreateTransfer {
            transfer_id,
            client_id,
            details,
            requires_payment,
        } = cmd;

        let result = self
            .handler
            .execute(transfer_id, |transfer| {
                transfer.create(transfer_id, client_id, details, requires_payment)
            })
            .await?;

        metrics::counter!("transfers_created_total", "status" => result.aggregate.status().as_str())
            .increment(1);
        tracing::info!(status = %result.aggregate.status(), "transfer created");
        Ok(result)
    }

    /// Loads a transfer or fails with [`DomainError::NotFound`].
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, transfer_id: TransferId) -> Result<Transfer, DomainError> {
        self.find(transfer_id)
            .await?
            .ok_or(DomainError::NotFound(transfer_id))
    }

    pub async fn find(&self, transfer_id: TransferId) -> Result<Option<Transfer>, DomainError> {
        self.handler.load_existing(transfer_id).await
    }

    /// Status trail in version order, starting with creation.
    #[tracing::instrument(skip(self))]
    pub async fn history(&self, transfer_id: TransferId) -> Result<Vec<StatusChange>, DomainError> {
        let envelopes = self.handler.store().load_stream(transfer_id).await?;
        if envelopes.is_empty() {
            return Err(DomainError::NotFound(transfer_id));
        }

        envelopes
            .into_iter()
            .map(|envelope| -> Result<StatusChange, DomainError> {
                let entry = match envelope.decode::<TransferEvent>()? {
                    TransferEvent::TransferCreated(data) => StatusChange {
                        version: envelope.version,
                        from: None,
                        to: data.status,
                        actor: Actor::Client(data.client_id),
                        drover_id: None,
                        reason: None,
                        at: data.created_at,
                    },
                    TransferEvent::StatusChanged(data) => StatusChange {
                        version: envelope.version,
                        from: Some(data.from),
                        to: data.to,
                        actor: data.actor,
                        drover_id: data.drover_id,
                        reason: data.reason,
                        at: data.changed_at,
                    },
                };
                Ok(entry)
            })
            .collect()
    }

    /// Moves a transfer along one edge of the lifecycle graph.
    ///
    /// Fails with `NotFound`, `InvalidTransition` or `StaleVersion`; a failure
    /// writes nothing and publishes nothing. On success the change is pushed
    /// to the affected drover, the client and the admin room.
    #[tracing::instrument(
        skip(self, cmd),
        fields(transfer_id = %cmd.transfer_id, target = %cmd.target, actor = %cmd.actor)
    )]
    pub async fn transition(&self, cmd: Transition) -> Result<CommandResult<Transfer>, DomainError> {
        let start = Instant::now();
        let Transition {
            transfer_id,
            target,
            actor,
            expected_version,
            drover_id,
            reason,
        } = cmd;

        let mut previous_drover = None;
        let outcome = self
            .handler
            .execute_expecting(transfer_id, expected_version, |transfer| {
                if transfer.id().is_none() {
                    return Err(TransferError::NotFound(transfer_id));
                }
                previous_drover = transfer.drover_id();
                transfer.transition(target, actor, drover_id, reason)
            })
            .await;

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                let reason = match &e {
                    DomainError::StaleVersion { .. } => "stale_version",
                    DomainError::NotFound(_) => "not_found",
                    DomainError::Transfer(TransferError::InvalidTransition { .. }) => {
                        "invalid_transition"
                    }
                    _ => "other",
                };
                metrics::counter!("transfer_transition_failures_total", "reason" => reason)
                    .increment(1);
                tracing::debug!(error = %e, "transition rejected");
                return Err(e);
            }
        };

        let from = result
            .events
            .iter()
            .find_map(|event| match event {
                TransferEvent::StatusChanged(data) => Some(data.from),
                TransferEvent::TransferCreated(_) => None,
            })
            .unwrap_or(target);

        metrics::counter!(
            "transfer_transitions_total",
            "from" => from.as_str(),
            "to" => target.as_str()
        )
        .increment(1);
        metrics::histogram!("transfer_transition_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        tracing::info!(%from, to = %target, version = %result.new_version, "transfer status changed");

        self.publish_status_change(&result, from, previous_drover);
        Ok(result)
    }

    fn publish_status_change(
        &self,
        result: &CommandResult<Transfer>,
        from: TransferStatus,
        previous_drover: Option<DroverId>,
    ) {
        let transfer = &result.aggregate;
        let Some(transfer_id) = transfer.id() else {
            return;
        };

        let event = RealtimeEvent::StatusChanged(StatusChangedEvent {
            transfer_id,
            from: from.to_string(),
            to: transfer.status().to_string(),
            drover_id: transfer.drover_id(),
            version: result.new_version.as_i64(),
            changed_at: transfer.updated_at().unwrap_or_else(Utc::now),
        });

        let mut rooms = vec![Room::Role(Role::Admin)];
        if let Some(client_id) = transfer.client_id() {
            rooms.push(Room::User(client_id));
        }
        for drover in [transfer.drover_id(), previous_drover].into_iter().flatten() {
            let room = Room::User(drover);
            if !rooms.contains(&room) {
                rooms.push(room);
            }
        }

        for room in rooms {
            self.channel.publish(room, event.clone());
        }
    }

    pub async fn confirm_payment(
        &self,
        transfer_id: TransferId,
        actor: Actor,
    ) -> Result<CommandResult<Transfer>, DomainError> {
        self.transition(Transition::to(transfer_id, TransferStatus::Created, actor))
            .await
    }

    /// Assigns `drover_id` if the transfer is still at `expected_version`.
    pub async fn assign(
        &self,
        transfer_id: TransferId,
        drover_id: DroverId,
        actor: Actor,
        expected_version: Option<Version>,
    ) -> Result<CommandResult<Transfer>, DomainError> {
        let mut cmd =
            Transition::to(transfer_id, TransferStatus::Assigned, actor).with_drover(drover_id);
        if let Some(version) = expected_version {
            cmd = cmd.expecting(version);
        }
        self.transition(cmd).await
    }

    pub async fn mark_picked_up(
        &self,
        transfer_id: TransferId,
        actor: Actor,
    ) -> Result<CommandResult<Transfer>, DomainError> {
        self.transition(Transition::to(transfer_id, TransferStatus::PickedUp, actor))
            .await
    }

    pub async fn depart(
        &self,
        transfer_id: TransferId,
        actor: Actor,
    ) -> Result<CommandResult<Transfer>, DomainError> {
        self.transition(Transition::to(transfer_id, TransferStatus::InProgress, actor))
            .await
    }

    pub async fn request_finish(
        &self,
        transfer_id: TransferId,
        actor: Actor,
    ) -> Result<CommandResult<Transfer>, DomainError> {
        self.transition(Transition::to(
            transfer_id,
            TransferStatus::RequestFinish,
            actor,
        ))
        .await
    }

    pub async fn mark_delivered(
        &self,
        transfer_id: TransferId,
        actor: Actor,
    ) -> Result<CommandResult<Transfer>, DomainError> {
        self.transition(Transition::to(transfer_id, TransferStatus::Delivered, actor))
            .await
    }

    pub async fn cancel(
        &self,
        transfer_id: TransferId,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<CommandResult<Transfer>, DomainError> {
        let mut cmd = Transition::to(transfer_id, TransferStatus::Cancelled, actor);
        if let Some(reason) = reason {
            cmd = cmd.because(reason);
        }
        self.transition(cmd).await
    }
}
