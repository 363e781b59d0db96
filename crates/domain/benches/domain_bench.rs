use std::sync::Arc;

use chrono::Utc;
use common::{DroverId, UserId};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{
    Actor, Address, Aggregate, Coordinates, CreateTransfer, Money, PaymentMethod, RouteEstimate,
    Transfer, TransferDetails, TransferEvent, TransferStateMachine, TransferStatus, Vehicle,
};
use event_store::InMemoryEventStore;
use realtime::RealtimeHub;

fn details() -> TransferDetails {
    let point = Coordinates { lat: 48.85, lng: 2.35 };
    TransferDetails {
        origin: Address {
            city: "Paris".to_string(),
            coordinates: point,
            line: "Rue de Rivoli 1".to_string(),
        },
        destination: Address {
            city: "Lyon".to_string(),
            coordinates: Coordinates { lat: 45.76, lng: 4.83 },
            line: "Place Bellecour".to_string(),
        },
        vehicle: Vehicle {
            brand: "Peugeot".to_string(),
            model: "308".to_string(),
            year: 2022,
            plate: "AB-123-CD".to_string(),
            vin: "VF3LBHNS000000000".to_string(),
        },
        pickup_at: Utc::now(),
        route: RouteEstimate {
            distance_m: 465_000,
            duration_s: 16_200,
            price: Money::from_cents(25_000),
        },
        payment_method: PaymentMethod::Cash,
    }
}

fn machine() -> TransferStateMachine<InMemoryEventStore> {
    TransferStateMachine::new(InMemoryEventStore::new(), Arc::new(RealtimeHub::new()))
}

fn bench_create_transfer(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let machine = machine();

    c.bench_function("domain/create_transfer", |b| {
        b.iter(|| {
            rt.block_on(async {
                machine
                    .create(CreateTransfer::new(UserId::new(), details()))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_full_trip(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let machine = machine();

    c.bench_function("domain/create_to_delivered", |b| {
        b.iter(|| {
            rt.block_on(async {
                let result = machine
                    .create(CreateTransfer::new(UserId::new(), details()))
                    .await
                    .unwrap();
                let id = result.aggregate.id().unwrap();
                let drover = DroverId::new();
                machine
                    .assign(id, drover, Actor::Drover(drover), Some(result.new_version))
                    .await
                    .unwrap();
                machine.mark_picked_up(id, Actor::System).await.unwrap();
                machine.depart(id, Actor::Drover(drover)).await.unwrap();
                machine.request_finish(id, Actor::Drover(drover)).await.unwrap();
                machine.mark_delivered(id, Actor::System).await.unwrap();
            });
        });
    });
}

fn bench_replay(c: &mut Criterion) {
    let drover = DroverId::new();
    let mut events = vec![TransferEvent::transfer_created(
        common::TransferId::new(),
        UserId::new(),
        details(),
        TransferStatus::Created,
    )];
    let path = [
        TransferStatus::Created,
        TransferStatus::Assigned,
        TransferStatus::PickedUp,
        TransferStatus::InProgress,
        TransferStatus::RequestFinish,
        TransferStatus::Delivered,
    ];
    for pair in path.windows(2) {
        events.push(TransferEvent::status_changed(
            pair[0],
            pair[1],
            Actor::System,
            Some(drover),
            None,
        ));
    }

    c.bench_function("domain/replay_full_trip", |b| {
        b.iter(|| {
            let mut transfer = Transfer::default();
            transfer.apply_events(events.clone());
            assert_eq!(transfer.status(), TransferStatus::Delivered);
        });
    });
}

criterion_group!(benches, bench_create_transfer, bench_full_trip, bench_replay);
criterion_main!(benches);
