//! Offer coordinator tests against the in-memory event store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{DroverId, Role, TransferId, UserId};
use dispatch::{
    DispatchError, InMemoryDroverRoster, ManualClock, OfferCoordinator, OfferOutcome, OfferPolicy,
};
use domain::{
    Actor, Address, Aggregate, Coordinates, CreateTransfer, Money, PaymentMethod, RouteEstimate,
    TransferDetails, TransferStateMachine, TransferStatus, Vehicle,
};
use event_store::InMemoryEventStore;
use realtime::{RealtimeEvent, RealtimeHub, Room, UnassignedReason};
use tokio::sync::broadcast;

fn details(payment_method: PaymentMethod) -> TransferDetails {
    TransferDetails {
        origin: Address {
            city: "Lyon".to_string(),
            coordinates: Coordinates {
                lat: 45.76,
                lng: 4.83,
            },
            line: "Place Bellecour 2".to_string(),
        },
        destination: Address {
            city: "Marseille".to_string(),
            coordinates: Coordinates {
                lat: 43.30,
                lng: 5.37,
            },
            line: "Quai du Port 10".to_string(),
        },
        vehicle: Vehicle {
            brand: "Renault".to_string(),
            model: "Clio".to_string(),
            year: 2021,
            plate: "AB-123-CD".to_string(),
            vin: "VF1RJA00000000000".to_string(),
        },
        pickup_at: Utc::now(),
        route: RouteEstimate {
            distance_m: 314_000,
            duration_s: 11_400,
            price: Money::from_cents(24_500),
        },
        payment_method,
    }
}

struct Harness {
    machine: Arc<TransferStateMachine<InMemoryEventStore>>,
    coordinator: OfferCoordinator,
    roster: InMemoryDroverRoster,
    hub: RealtimeHub,
    clock: ManualClock,
}

impl Harness {
    fn new(ttl_secs: u64) -> Self {
        let hub = RealtimeHub::new();
        let machine = Arc::new(TransferStateMachine::new(
            InMemoryEventStore::new(),
            Arc::new(hub.clone()),
        ));
        let roster = InMemoryDroverRoster::new();
        let clock = ManualClock::default();
        // Long tick so only explicit sweeps expire offers.
        let policy = OfferPolicy::new(Duration::from_secs(ttl_secs))
            .with_sweep_interval(Duration::from_secs(3600));
        let (coordinator, _task) = OfferCoordinator::spawn(
            machine.clone(),
            roster.clone(),
            Arc::new(hub.clone()),
            Arc::new(clock.clone()),
            policy,
        );

        Self {
            machine,
            coordinator,
            roster,
            hub,
            clock,
        }
    }

    fn drovers(&self, count: usize) -> Vec<DroverId> {
        (0..count)
            .map(|_| {
                let drover = DroverId::new();
                self.roster.set_available(drover, true);
                drover
            })
            .collect()
    }

    async fn create(&self, payment_method: PaymentMethod) -> TransferId {
        let result = self
            .machine
            .create(CreateTransfer::new(UserId::new(), details(payment_method)))
            .await
            .unwrap();
        result.aggregate.id().unwrap()
    }
}

fn drain(rx: &mut broadcast::Receiver<RealtimeEvent>) -> Vec<RealtimeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn names(events: &[RealtimeEvent]) -> Vec<&'static str> {
    events.iter().map(RealtimeEvent::name).collect()
}

mod race {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_accepts_have_exactly_one_winner() {
        let h = Harness::new(90);
        let drovers = h.drovers(10);
        let id = h.create(PaymentMethod::Cash).await;
        let report = h.coordinator.dispatch(id).await.unwrap();
        assert_eq!(report.offered.len(), 10);

        let mut handles = Vec::new();
        for drover in drovers {
            let coordinator = h.coordinator.clone();
            handles.push(tokio::spawn(async move {
                (drover, coordinator.accept(id, drover).await)
            }));
        }

        let mut winners = Vec::new();
        let mut already_taken = 0;
        for handle in handles {
            match handle.await.unwrap() {
                (drover, Ok(_)) => winners.push(drover),
                (_, Err(DispatchError::AlreadyAssigned(_))) => already_taken += 1,
                (_, Err(e)) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(winners.len(), 1);
        assert_eq!(already_taken, 9);

        let transfer = h.machine.get(id).await.unwrap();
        assert_eq!(transfer.status(), TransferStatus::Assigned);
        assert_eq!(transfer.drover_id(), Some(winners[0]));

        let offers = h.coordinator.offers(id).await.unwrap();
        let accepted = offers
            .iter()
            .filter(|o| o.outcome == OfferOutcome::Accepted)
            .count();
        assert_eq!(accepted, 1);
        assert!(offers.iter().all(|o| o.outcome != OfferOutcome::Pending));
    }

    #[tokio::test]
    async fn losers_get_retractions_and_late_accept_is_already_taken() {
        let h = Harness::new(90);
        let [a, b, c]: [DroverId; 3] = h.drovers(3).try_into().unwrap();
        let mut rx_a = h.hub.subscribe(Room::User(a));
        let mut rx_b = h.hub.subscribe(Room::User(b));
        let mut rx_c = h.hub.subscribe(Room::User(c));

        let id = h.create(PaymentMethod::Cash).await;
        h.coordinator.dispatch(id).await.unwrap();

        let transfer = h.coordinator.accept(id, b).await.unwrap();
        assert_eq!(transfer.status(), TransferStatus::Assigned);
        assert_eq!(transfer.drover_id(), Some(b));

        assert_eq!(names(&drain(&mut rx_a)), vec!["offer", "offer:retracted"]);
        assert_eq!(names(&drain(&mut rx_c)), vec!["offer", "offer:retracted"]);
        assert_eq!(names(&drain(&mut rx_b)), vec!["offer", "status:changed"]);

        let late = h.coordinator.accept(id, a).await;
        assert!(matches!(late, Err(DispatchError::AlreadyAssigned(t)) if t == id));
    }

    #[tokio::test]
    async fn admin_override_supersedes_pending_offers() {
        let h = Harness::new(90);
        let [a, b]: [DroverId; 2] = h.drovers(2).try_into().unwrap();
        let mut rx_a = h.hub.subscribe(Room::User(a));
        let id = h.create(PaymentMethod::Cash).await;
        h.coordinator.dispatch(id).await.unwrap();

        let chosen = DroverId::new();
        let transfer = h
            .coordinator
            .assign_override(id, chosen, Actor::Admin(UserId::new()))
            .await
            .unwrap();
        assert_eq!(transfer.drover_id(), Some(chosen));
        assert_eq!(names(&drain(&mut rx_a)), vec!["offer", "offer:retracted"]);

        let result = h.coordinator.accept(id, b).await;
        assert!(matches!(result, Err(DispatchError::AlreadyAssigned(_))));
    }

    #[tokio::test]
    async fn accept_after_out_of_band_assignment_is_already_taken() {
        let h = Harness::new(90);
        let [a]: [DroverId; 1] = h.drovers(1).try_into().unwrap();
        let id = h.create(PaymentMethod::Cash).await;
        h.coordinator.dispatch(id).await.unwrap();

        let other = DroverId::new();
        h.machine
            .assign(id, other, Actor::Drover(other), None)
            .await
            .unwrap();

        let result = h.coordinator.accept(id, a).await;
        assert!(matches!(result, Err(DispatchError::AlreadyAssigned(_))));
        assert_eq!(h.machine.get(id).await.unwrap().drover_id(), Some(other));
    }
}

mod expiry {
    use super::*;

    #[tokio::test]
    async fn accept_after_ttl_is_offer_expired() {
        let h = Harness::new(60);
        let [a]: [DroverId; 1] = h.drovers(1).try_into().unwrap();
        let mut rx_a = h.hub.subscribe(Room::User(a));
        let mut admin = h.hub.subscribe(Room::Role(Role::Admin));
        let id = h.create(PaymentMethod::Cash).await;
        h.coordinator.dispatch(id).await.unwrap();
        drain(&mut admin);

        h.clock.advance(chrono::Duration::seconds(61));
        let result = h.coordinator.accept(id, a).await;
        assert!(matches!(
            result,
            Err(DispatchError::OfferExpired { drover_id, .. }) if drover_id == a
        ));

        let offers = h.coordinator.offers(id).await.unwrap();
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].outcome, OfferOutcome::Expired);
        assert_eq!(names(&drain(&mut rx_a)), vec!["offer", "offer:retracted"]);
        assert_eq!(
            h.machine.get(id).await.unwrap().status(),
            TransferStatus::Created
        );

        let alerts = drain(&mut admin);
        assert!(alerts.iter().any(|e| matches!(
            e,
            RealtimeEvent::TransferUnassigned(u) if u.reason == UnassignedReason::OffersExhausted
        )));
    }

    #[tokio::test]
    async fn accept_just_before_ttl_still_wins() {
        let h = Harness::new(60);
        let [a]: [DroverId; 1] = h.drovers(1).try_into().unwrap();
        let id = h.create(PaymentMethod::Cash).await;
        h.coordinator.dispatch(id).await.unwrap();

        h.clock.advance(chrono::Duration::seconds(59));
        assert!(h.coordinator.accept(id, a).await.is_ok());
    }

    #[tokio::test]
    async fn sweep_expires_overdue_offers_and_alerts_admin() {
        let h = Harness::new(60);
        h.drovers(2);
        let mut admin = h.hub.subscribe(Room::Role(Role::Admin));
        let id = h.create(PaymentMethod::Cash).await;
        h.coordinator.dispatch(id).await.unwrap();

        let early = h.coordinator.sweep_now().await.unwrap();
        assert_eq!(early.expired, 0);

        h.clock.advance(chrono::Duration::seconds(60));
        let report = h.coordinator.sweep_now().await.unwrap();
        assert_eq!(report.expired, 2);
        assert_eq!(report.exhausted, vec![id]);

        let unassigned: Vec<_> = drain(&mut admin)
            .into_iter()
            .filter_map(|e| match e {
                RealtimeEvent::TransferUnassigned(u) => Some(u),
                _ => None,
            })
            .collect();
        assert_eq!(unassigned.len(), 1);
        assert_eq!(unassigned[0].offers_sent, 2);
    }

    #[tokio::test]
    async fn redispatch_after_exhaustion_opens_fresh_offers() {
        let h = Harness::new(60);
        let [a]: [DroverId; 1] = h.drovers(1).try_into().unwrap();
        let id = h.create(PaymentMethod::Cash).await;
        h.coordinator.dispatch(id).await.unwrap();

        h.clock.advance(chrono::Duration::seconds(90));
        h.coordinator.sweep_now().await.unwrap();

        let report = h.coordinator.dispatch(id).await.unwrap();
        assert_eq!(report.offered, vec![a]);
        assert!(h.coordinator.accept(id, a).await.is_ok());
    }
}

mod decline {
    use super::*;

    #[tokio::test]
    async fn decline_leaves_other_offers_pending() {
        let h = Harness::new(90);
        let [a, b]: [DroverId; 2] = h.drovers(2).try_into().unwrap();
        let id = h.create(PaymentMethod::Cash).await;
        h.coordinator.dispatch(id).await.unwrap();

        h.coordinator.decline(id, a).await.unwrap();

        let offers = h.coordinator.offers(id).await.unwrap();
        let outcome_of = |drover| {
            offers
                .iter()
                .find(|o| o.drover_id == drover)
                .map(|o| o.outcome)
        };
        assert_eq!(outcome_of(a), Some(OfferOutcome::Declined));
        assert_eq!(outcome_of(b), Some(OfferOutcome::Pending));

        assert!(matches!(
            h.coordinator.decline(id, a).await,
            Err(DispatchError::OfferExpired { .. })
        ));
        assert!(matches!(
            h.coordinator.accept(id, a).await,
            Err(DispatchError::OfferExpired { .. })
        ));
        assert!(h.coordinator.accept(id, b).await.is_ok());
    }

    #[tokio::test]
    async fn everyone_declining_alerts_admin() {
        let h = Harness::new(90);
        let drovers = h.drovers(2);
        let mut admin = h.hub.subscribe(Room::Role(Role::Admin));
        let id = h.create(PaymentMethod::Cash).await;
        h.coordinator.dispatch(id).await.unwrap();

        for drover in drovers {
            h.coordinator.decline(id, drover).await.unwrap();
        }

        assert_eq!(names(&drain(&mut admin)), vec!["transfer:unassigned"]);
    }

    #[tokio::test]
    async fn unknown_offer_is_offer_expired() {
        let h = Harness::new(90);
        let id = h.create(PaymentMethod::Cash).await;

        let result = h.coordinator.accept(id, DroverId::new()).await;
        assert!(matches!(result, Err(DispatchError::OfferExpired { .. })));
    }
}

mod dispatching {
    use super::*;

    #[tokio::test]
    async fn offer_carries_transfer_summary() {
        let h = Harness::new(90);
        let [a]: [DroverId; 1] = h.drovers(1).try_into().unwrap();
        let mut rx_a = h.hub.subscribe(Room::User(a));
        let id = h.create(PaymentMethod::Cash).await;

        let report = h.coordinator.dispatch(id).await.unwrap();

        let events = drain(&mut rx_a);
        let RealtimeEvent::Offer(offer) = &events[0] else {
            panic!("expected an offer, got {events:?}");
        };
        assert_eq!(offer.transfer_id, id);
        assert_eq!(offer.details.origin_city, "Lyon");
        assert_eq!(offer.details.price_cents, 24_500);
        assert_eq!(Some(offer.expires_at), report.expires_at);
    }

    #[tokio::test]
    async fn dispatching_twice_does_not_duplicate_pending_offers() {
        let h = Harness::new(90);
        h.drovers(3);
        let id = h.create(PaymentMethod::Cash).await;

        h.coordinator.dispatch(id).await.unwrap();
        let again = h.coordinator.dispatch(id).await.unwrap();

        assert!(again.offered.is_empty());
        assert_eq!(again.pending, 3);
        assert_eq!(h.coordinator.offers(id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn no_candidates_alerts_admin() {
        let h = Harness::new(90);
        let mut admin = h.hub.subscribe(Room::Role(Role::Admin));
        let id = h.create(PaymentMethod::Cash).await;

        let report = h.coordinator.dispatch(id).await.unwrap();
        assert_eq!(report.pending, 0);

        let events = drain(&mut admin);
        assert!(matches!(
            events.as_slice(),
            [RealtimeEvent::TransferUnassigned(u)] if u.reason == UnassignedReason::NoCandidates
        ));
    }

    #[tokio::test]
    async fn unpaid_transfer_is_not_dispatchable() {
        let h = Harness::new(90);
        h.drovers(1);
        let id = h.create(PaymentMethod::Card).await;

        let result = h.coordinator.dispatch(id).await;
        assert!(matches!(
            result,
            Err(DispatchError::NotDispatchable { status: TransferStatus::PendingPaid, .. })
        ));
    }

    #[tokio::test]
    async fn roster_failure_is_reported() {
        let h = Harness::new(90);
        h.roster.set_fail_on_lookup(true);
        let id = h.create(PaymentMethod::Cash).await;

        let result = h.coordinator.dispatch(id).await;
        assert!(matches!(result, Err(DispatchError::Candidates(_))));
    }

    #[tokio::test]
    async fn stopped_coordinator_reports_channel_closed() {
        let hub = RealtimeHub::new();
        let machine = Arc::new(TransferStateMachine::new(
            InMemoryEventStore::new(),
            Arc::new(hub.clone()),
        ));
        let (coordinator, task) = OfferCoordinator::spawn(
            machine,
            InMemoryDroverRoster::new(),
            Arc::new(hub),
            Arc::new(ManualClock::default()),
            OfferPolicy::default(),
        );
        task.abort();
        let _ = task.await;

        let result = coordinator.offers(TransferId::new()).await;
        assert!(matches!(result, Err(DispatchError::ChannelClosed)));
    }
}

mod cancellation {
    use super::*;

    #[tokio::test]
    async fn cancelling_in_progress_transfer_invalidates_pending_offers() {
        let h = Harness::new(90);
        let [a, b]: [DroverId; 2] = h.drovers(2).try_into().unwrap();
        let mut rx_a = h.hub.subscribe(Room::User(a));
        let mut rx_b = h.hub.subscribe(Room::User(b));
        let id = h.create(PaymentMethod::Cash).await;
        h.coordinator.dispatch(id).await.unwrap();

        let driver = DroverId::new();
        h.machine
            .assign(id, driver, Actor::Admin(UserId::new()), None)
            .await
            .unwrap();
        h.machine.mark_picked_up(id, Actor::System).await.unwrap();
        h.machine.depart(id, Actor::Drover(driver)).await.unwrap();

        let transfer = h
            .coordinator
            .cancel_transfer(
                id,
                Actor::Admin(UserId::new()),
                Some("vehicle damaged".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(transfer.status(), TransferStatus::Cancelled);
        assert_eq!(transfer.drover_id(), None);

        let offers = h.coordinator.offers(id).await.unwrap();
        assert!(offers.iter().all(|o| o.outcome == OfferOutcome::Superseded));
        assert_eq!(names(&drain(&mut rx_a)), vec!["offer", "offer:retracted"]);
        assert_eq!(names(&drain(&mut rx_b)), vec!["offer", "offer:retracted"]);
    }

    #[tokio::test]
    async fn cancelling_twice_is_rejected() {
        let h = Harness::new(90);
        h.drovers(1);
        let id = h.create(PaymentMethod::Cash).await;
        h.coordinator.dispatch(id).await.unwrap();

        h.coordinator
            .cancel_transfer(id, Actor::System, None)
            .await
            .unwrap();
        let again = h.coordinator.cancel_transfer(id, Actor::System, None).await;

        assert!(matches!(again, Err(DispatchError::Domain(_))));
    }
}
