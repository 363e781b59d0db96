//! The offer coordinator: one task owns every offer and resolves races.
//!
//! Callers talk to the task through [`OfferCoordinator`], a cloneable handle
//! that sends a request over an mpsc channel and awaits the reply on a
//! oneshot. Requests are handled one at a time, so offer resolution for a
//! transfer is totally ordered; the state machine's version check still
//! guards against writers outside the coordinator.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{DroverId, Role, TransferId};
use domain::{
    Actor, Aggregate, DomainError, Transfer, TransferError, TransferStateMachine, TransferStatus,
};
use event_store::EventStore;
use realtime::{
    OfferEvent, RealtimeChannel, RealtimeEvent, RetractionEvent, Room, UnassignedEvent,
    UnassignedReason,
};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::candidates::CandidateSource;
use crate::clock::Clock;
use crate::error::{DispatchError, Result};
use crate::offer::{Offer, OfferLedger, OfferOutcome, OfferPolicy};

const REQUEST_BUFFER: usize = 256;

/// Result of broadcasting a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub transfer_id: TransferId,
    /// Drovers that received a new offer in this round.
    pub offered: Vec<DroverId>,
    /// Offers still pending after this round, including earlier ones.
    pub pending: usize,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Outcome of one expiry sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    /// Transfers whose last pending offer ran out during this sweep.
    pub exhausted: Vec<TransferId>,
}

enum Request {
    Dispatch {
        transfer_id: TransferId,
        reply: oneshot::Sender<Result<DispatchReport>>,
    },
    Accept {
        transfer_id: TransferId,
        drover_id: DroverId,
        reply: oneshot::Sender<Result<Transfer>>,
    },
    Decline {
        transfer_id: TransferId,
        drover_id: DroverId,
        reply: oneshot::Sender<Result<()>>,
    },
    Cancel {
        transfer_id: TransferId,
        actor: Actor,
        reason: Option<String>,
        reply: oneshot::Sender<Result<Transfer>>,
    },
    AssignOverride {
        transfer_id: TransferId,
        drover_id: DroverId,
        actor: Actor,
        reply: oneshot::Sender<Result<Transfer>>,
    },
    Offers {
        transfer_id: TransferId,
        reply: oneshot::Sender<Vec<Offer>>,
    },
    Sweep {
        reply: oneshot::Sender<SweepReport>,
    },
}

/// Handle to the coordinator task. Cloning is cheap; the task stops once
/// every handle is dropped.
#[derive(Debug, Clone)]
pub struct OfferCoordinator {
    tx: mpsc::Sender<Request>,
}

impl OfferCoordinator {
    /// Starts the coordinator task on the current runtime.
    pub fn spawn<S, C>(
        machine: Arc<TransferStateMachine<S>>,
        candidates: C,
        channel: Arc<dyn RealtimeChannel>,
        clock: Arc<dyn Clock>,
        policy: OfferPolicy,
    ) -> (Self, JoinHandle<()>)
    where
        S: EventStore + 'static,
        C: CandidateSource + 'static,
    {
        let (tx, rx) = mpsc::channel(REQUEST_BUFFER);
        let worker = Worker {
            machine,
            candidates,
            channel,
            clock,
            policy,
            ledger: OfferLedger::new(),
        };
        let handle = tokio::spawn(worker.run(rx));
        (Self { tx }, handle)
    }

    /// Offers a `created` transfer to every available drover that does not
    /// already hold a pending offer for it.
    pub async fn dispatch(&self, transfer_id: TransferId) -> Result<DispatchReport> {
        self.request(|reply| Request::Dispatch { transfer_id, reply })
            .await?
    }

    /// Resolves a drover's accept. Exactly one accept per transfer succeeds;
    /// the rest get [`DispatchError::AlreadyAssigned`].
    pub async fn accept(&self, transfer_id: TransferId, drover_id: DroverId) -> Result<Transfer> {
        self.request(|reply| Request::Accept {
            transfer_id,
            drover_id,
            reply,
        })
        .await?
    }

    pub async fn decline(&self, transfer_id: TransferId, drover_id: DroverId) -> Result<()> {
        self.request(|reply| Request::Decline {
            transfer_id,
            drover_id,
            reply,
        })
        .await?
    }

    /// Cancels the transfer and withdraws its pending offers.
    pub async fn cancel_transfer(
        &self,
        transfer_id: TransferId,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<Transfer> {
        self.request(|reply| Request::Cancel {
            transfer_id,
            actor,
            reason,
            reply,
        })
        .await?
    }

    /// Assigns a drover directly, bypassing the offer race.
    pub async fn assign_override(
        &self,
        transfer_id: TransferId,
        drover_id: DroverId,
        actor: Actor,
    ) -> Result<Transfer> {
        self.request(|reply| Request::AssignOverride {
            transfer_id,
            drover_id,
            actor,
            reply,
        })
        .await?
    }

    pub async fn offers(&self, transfer_id: TransferId) -> Result<Vec<Offer>> {
        self.request(|reply| Request::Offers { transfer_id, reply })
            .await
    }

    /// Runs an expiry sweep now instead of waiting for the next tick.
    pub async fn sweep_now(&self) -> Result<SweepReport> {
        self.request(|reply| Request::Sweep { reply }).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| DispatchError::ChannelClosed)?;
        response.await.map_err(|_| DispatchError::ChannelClosed)
    }
}

struct Worker<S: EventStore, C> {
    machine: Arc<TransferStateMachine<S>>,
    candidates: C,
    channel: Arc<dyn RealtimeChannel>,
    clock: Arc<dyn Clock>,
    policy: OfferPolicy,
    ledger: OfferLedger,
}

impl<S, C> Worker<S, C>
where
    S: EventStore + 'static,
    C: CandidateSource + 'static,
{
    async fn run(mut self, mut rx: mpsc::Receiver<Request>) {
        let period = self.policy.sweep_interval();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            ttl_secs = self.policy.ttl().as_secs(),
            sweep_interval_ms = period.as_millis() as u64,
            "offer coordinator started"
        );

        loop {
            tokio::select! {
                request = rx.recv() => {
                    let Some(request) = request else {
                        tracing::info!("offer coordinator stopping");
                        break;
                    };
                    self.handle(request).await;
                }
                _ = ticker.tick() => {
                    let report = self.sweep();
                    if report.expired > 0 {
                        tracing::debug!(expired = report.expired, "offer sweep");
                    }
                }
            }
        }
    }

    // A dropped reply receiver means the caller went away; nothing to do.
    async fn handle(&mut self, request: Request) {
        match request {
            Request::Dispatch { transfer_id, reply } => {
                let _ = reply.send(self.dispatch(transfer_id).await);
            }
            Request::Accept {
                transfer_id,
                drover_id,
                reply,
            } => {
                let _ = reply.send(self.accept(transfer_id, drover_id).await);
            }
            Request::Decline {
                transfer_id,
                drover_id,
                reply,
            } => {
                let _ = reply.send(self.decline(transfer_id, drover_id));
            }
            Request::Cancel {
                transfer_id,
                actor,
                reason,
                reply,
            } => {
                let _ = reply.send(self.cancel(transfer_id, actor, reason).await);
            }
            Request::AssignOverride {
                transfer_id,
                drover_id,
                actor,
                reply,
            } => {
                let _ = reply.send(self.assign_override(transfer_id, drover_id, actor).await);
            }
            Request::Offers { transfer_id, reply } => {
                let _ = reply.send(self.ledger.offers(transfer_id));
            }
            Request::Sweep { reply } => {
                let _ = reply.send(self.sweep());
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn dispatch(&mut self, transfer_id: TransferId) -> Result<DispatchReport> {
        let transfer = self.machine.get(transfer_id).await?;
        if transfer.status() != TransferStatus::Created {
            return Err(DispatchError::NotDispatchable {
                transfer_id,
                status: transfer.status(),
            });
        }
        let summary = transfer
            .details()
            .map(|details| details.offer_summary())
            .ok_or(DomainError::NotFound(transfer_id))?;

        let candidates = self.candidates.candidates(&transfer).await?;
        let now = self.clock.now();
        let ttl = self.policy.ttl_delta();

        let mut offered = Vec::new();
        let mut expires_at = None;
        for drover_id in candidates {
            let Some(offer) = self.ledger.open(transfer_id, drover_id, now, ttl) else {
                continue;
            };
            expires_at = Some(offer.expires_at);
            self.channel.publish(
                Room::User(drover_id),
                RealtimeEvent::Offer(OfferEvent {
                    transfer_id,
                    details: summary.clone(),
                    expires_at: offer.expires_at,
                }),
            );
            offered.push(drover_id);
        }
        metrics::counter!("offers_created_total").increment(offered.len() as u64);

        let pending = self.ledger.pending_count(transfer_id);
        if pending == 0 {
            tracing::warn!("no drover available for transfer");
            self.alert_unassigned(transfer_id, UnassignedReason::NoCandidates);
        } else {
            tracing::info!(offered = offered.len(), pending, "transfer dispatched");
        }

        Ok(DispatchReport {
            transfer_id,
            offered,
            pending,
            expires_at,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn accept(&mut self, transfer_id: TransferId, drover_id: DroverId) -> Result<Transfer> {
        self.check_integrity(transfer_id)?;
        if self.ledger.accepted_count(transfer_id) > 0 {
            return Err(self.race_lost(transfer_id));
        }

        let now = self.clock.now();
        self.claim(transfer_id, drover_id, now)?;

        let transfer = self.machine.get(transfer_id).await?;
        if transfer.status() != TransferStatus::Created {
            self.withdraw_pending(transfer_id, None);
            return Err(self.race_lost(transfer_id));
        }

        let assigned = self
            .machine
            .assign(
                transfer_id,
                drover_id,
                Actor::Drover(drover_id),
                Some(transfer.version()),
            )
            .await;

        match assigned {
            Ok(result) => {
                self.ledger
                    .resolve(transfer_id, drover_id, OfferOutcome::Accepted, now);
                self.withdraw_pending(transfer_id, None);
                self.check_integrity(transfer_id)?;

                metrics::counter!("offers_accepted_total").increment(1);
                tracing::info!(version = %result.new_version, "offer accepted");
                Ok(result.aggregate)
            }
            Err(
                DomainError::StaleVersion { .. }
                | DomainError::Transfer(TransferError::InvalidTransition { .. }),
            ) => {
                self.withdraw_pending(transfer_id, None);
                Err(self.race_lost(transfer_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Checks that the drover still holds a live offer, expiring it on the
    /// spot if it is overdue.
    fn claim(&mut self, transfer_id: TransferId, drover_id: DroverId, now: DateTime<Utc>) -> Result<()> {
        let expired = DispatchError::OfferExpired {
            transfer_id,
            drover_id,
        };
        let Some((outcome, overdue)) = self
            .ledger
            .latest(transfer_id, drover_id)
            .map(|offer| (offer.outcome, offer.is_overdue(now)))
        else {
            return Err(expired);
        };

        match outcome {
            OfferOutcome::Pending if overdue => {
                self.ledger
                    .resolve(transfer_id, drover_id, OfferOutcome::Expired, now);
                metrics::counter!("offers_expired_total").increment(1);
                self.retract(transfer_id, drover_id);
                if self.ledger.is_exhausted(transfer_id) {
                    self.alert_unassigned(transfer_id, UnassignedReason::OffersExhausted);
                }
                Err(expired)
            }
            OfferOutcome::Pending => Ok(()),
            OfferOutcome::Superseded | OfferOutcome::Accepted => Err(self.race_lost(transfer_id)),
            OfferOutcome::Declined | OfferOutcome::Expired => Err(expired),
        }
    }

    #[tracing::instrument(skip(self))]
    fn decline(&mut self, transfer_id: TransferId, drover_id: DroverId) -> Result<()> {
        let now = self.clock.now();
        let expired = DispatchError::OfferExpired {
            transfer_id,
            drover_id,
        };
        let Some(overdue) = self
            .ledger
            .latest(transfer_id, drover_id)
            .filter(|offer| offer.is_pending())
            .map(|offer| offer.is_overdue(now))
        else {
            return Err(expired);
        };

        let outcome = if overdue {
            metrics::counter!("offers_expired_total").increment(1);
            OfferOutcome::Expired
        } else {
            OfferOutcome::Declined
        };
        self.ledger.resolve(transfer_id, drover_id, outcome, now);
        if self.ledger.is_exhausted(transfer_id) {
            self.alert_unassigned(transfer_id, UnassignedReason::OffersExhausted);
        }

        match outcome {
            OfferOutcome::Expired => Err(expired),
            _ => {
                tracing::info!("offer declined");
                Ok(())
            }
        }
    }

    #[tracing::instrument(skip(self, reason))]
    async fn cancel(
        &mut self,
        transfer_id: TransferId,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<Transfer> {
        let result = self.machine.cancel(transfer_id, actor, reason).await?;
        let withdrawn = self.withdraw_pending(transfer_id, None);
        tracing::info!(withdrawn, "transfer cancelled");
        Ok(result.aggregate)
    }

    #[tracing::instrument(skip(self))]
    async fn assign_override(
        &mut self,
        transfer_id: TransferId,
        drover_id: DroverId,
        actor: Actor,
    ) -> Result<Transfer> {
        let result = self
            .machine
            .assign(transfer_id, drover_id, actor, None)
            .await?;
        let withdrawn = self.withdraw_pending(transfer_id, Some(drover_id));
        tracing::info!(withdrawn, "transfer assigned by override");
        Ok(result.aggregate)
    }

    fn sweep(&mut self) -> SweepReport {
        let now = self.clock.now();
        let expired = self.ledger.expire_overdue(now);

        let mut exhausted = Vec::new();
        for offer in &expired {
            self.retract(offer.transfer_id, offer.drover_id);
            if !exhausted.contains(&offer.transfer_id) && self.ledger.is_exhausted(offer.transfer_id)
            {
                exhausted.push(offer.transfer_id);
            }
        }
        for &transfer_id in &exhausted {
            self.alert_unassigned(transfer_id, UnassignedReason::OffersExhausted);
        }
        metrics::counter!("offers_expired_total").increment(expired.len() as u64);

        let pruned = self.ledger.prune(now, self.policy.retention_delta());
        if pruned > 0 {
            tracing::debug!(pruned, "offer ledger pruned");
        }

        SweepReport {
            expired: expired.len(),
            exhausted,
        }
    }

    /// Supersedes every pending offer of a transfer and retracts them. The
    /// drover in `keep_silent` is not sent a retraction.
    fn withdraw_pending(&mut self, transfer_id: TransferId, keep_silent: Option<DroverId>) -> usize {
        let drovers = self
            .ledger
            .supersede_pending(transfer_id, self.clock.now());
        for &drover_id in &drovers {
            if Some(drover_id) != keep_silent {
                self.retract(transfer_id, drover_id);
            }
        }
        drovers.len()
    }

    fn check_integrity(&self, transfer_id: TransferId) -> Result<()> {
        let accepted = self.ledger.accepted_count(transfer_id);
        if accepted > 1 {
            metrics::counter!("dispatch_integrity_violations_total").increment(1);
            tracing::error!(%transfer_id, accepted, "more than one accepted offer");
            return Err(DispatchError::IntegrityViolation {
                transfer_id,
                accepted,
            });
        }
        Ok(())
    }

    fn race_lost(&self, transfer_id: TransferId) -> DispatchError {
        metrics::counter!("offer_race_lost_total").increment(1);
        tracing::debug!(%transfer_id, "accept lost the race");
        DispatchError::AlreadyAssigned(transfer_id)
    }

    fn retract(&self, transfer_id: TransferId, drover_id: DroverId) {
        self.channel.publish(
            Room::User(drover_id),
            RealtimeEvent::OfferRetracted(RetractionEvent { transfer_id }),
        );
    }

    fn alert_unassigned(&self, transfer_id: TransferId, reason: UnassignedReason) {
        let offers_sent = self.ledger.offers(transfer_id).len();
        tracing::warn!(%transfer_id, ?reason, offers_sent, "transfer left unassigned");
        self.channel.publish(
            Room::Role(Role::Admin),
            RealtimeEvent::TransferUnassigned(UnassignedEvent {
                transfer_id,
                reason,
                offers_sent,
            }),
        );
    }
}
