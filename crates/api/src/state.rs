//! Shared application state.

use std::sync::Arc;

use dispatch::{InMemoryDroverRoster, OfferCoordinator, OfferPolicy, SystemClock};
use domain::TransferStateMachine;
use event_store::{EventStore, InMemoryEventStore};
use realtime::RealtimeHub;
use verification::{InMemoryStepProgressStore, StepProgressStore, VerificationWorkflowEngine};

/// Services every handler can reach.
pub struct AppState<S: EventStore, P: StepProgressStore> {
    pub machine: Arc<TransferStateMachine<S>>,
    pub coordinator: OfferCoordinator,
    pub verification: VerificationWorkflowEngine<S, P>,
    pub roster: InMemoryDroverRoster,
    pub hub: RealtimeHub,
}

/// Wires the state machine, offer coordinator and verification engine
/// around one realtime hub. Spawns the coordinator task, so it must run
/// inside a tokio runtime.
pub fn create_state<S, P>(store: S, progress: P, policy: OfferPolicy) -> Arc<AppState<S, P>>
where
    S: EventStore + 'static,
    P: StepProgressStore + 'static,
{
    let hub = RealtimeHub::new();
    let machine = Arc::new(TransferStateMachine::new(store, Arc::new(hub.clone())));
    let roster = InMemoryDroverRoster::new();
    let (coordinator, _task) = OfferCoordinator::spawn(
        machine.clone(),
        roster.clone(),
        Arc::new(hub.clone()),
        Arc::new(SystemClock),
        policy,
    );
    let verification = VerificationWorkflowEngine::new(progress, machine.clone());

    Arc::new(AppState {
        machine,
        coordinator,
        verification,
        roster,
        hub,
    })
}

/// State backed entirely by in-memory stores.
pub fn create_default_state(
    policy: OfferPolicy,
) -> Arc<AppState<InMemoryEventStore, InMemoryStepProgressStore>> {
    create_state(
        InMemoryEventStore::new(),
        InMemoryStepProgressStore::new(),
        policy,
    )
}
