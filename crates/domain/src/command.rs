//! Command handling infrastructure.
//!
//! Every state change goes through [`CommandHandler::execute`]: replay the
//! stream, decide on new events, and append them guarded by the version that
//! was replayed.

use std::marker::PhantomData;

use common::TransferId;
use event_store::{EventEnvelope, EventStore, Version};
use serde::{Serialize, de::DeserializeOwned};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::DomainError;

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate after applying the new events.
    pub aggregate: A,

    /// The events that were generated and persisted.
    pub events: Vec<A::Event>,

    /// Stream version after the command.
    pub new_version: Version,
}

/// Commands name the stream they target.
pub trait Command: Send + Sync {
    type Aggregate: Aggregate;

    fn transfer_id(&self) -> TransferId;
}

pub struct CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    store: S,
    _phantom: PhantomData<A>,
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Rebuilds an aggregate from its stream. Unknown ids yield a default
    /// instance at version 0.
    pub async fn load(&self, transfer_id: TransferId) -> Result<A, DomainError> {
        let events = self.store.load_stream(transfer_id).await?;

        let mut aggregate = A::default();
        for envelope in events {
            let event: A::Event = envelope.decode()?;
            aggregate.apply(event);
            aggregate.set_version(envelope.version);
        }

        Ok(aggregate)
    }

    pub async fn load_existing(&self, transfer_id: TransferId) -> Result<Option<A>, DomainError> {
        let aggregate = self.load(transfer_id).await?;
        Ok(aggregate.id().is_some().then_some(aggregate))
    }

    /// Executes a command against the current state and persists the result.
    pub async fn execute<F>(
        &self,
        transfer_id: TransferId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        A::Event: Serialize,
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        self.execute_expecting(transfer_id, None, command_fn).await
    }

    /// Like [`execute`](Self::execute), but first checks that the stream is
    /// still at `expected`, the version the caller last read.
    ///
    /// Both that check and the store append report a moved stream as
    /// [`DomainError::StaleVersion`].
    pub async fn execute_expecting<F>(
        &self,
        transfer_id: TransferId,
        expected: Option<Version>,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        A::Event: Serialize,
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let mut aggregate = self.load(transfer_id).await?;
        let current_version = aggregate.version();

        if let Some(expected) = expected
            && expected != current_version
        {
            return Err(DomainError::StaleVersion {
                transfer_id,
                expected,
                actual: current_version,
            });
        }

        let events = command_fn(&aggregate)?;

        if events.is_empty() {
            return Ok(CommandResult {
                aggregate,
                events: vec![],
                new_version: current_version,
            });
        }

        let envelopes = self.build_envelopes(transfer_id, current_version, &events)?;
        let new_version = self.store.append(current_version, envelopes).await?;

        for event in &events {
            aggregate.apply(event.clone());
        }
        aggregate.set_version(new_version);

        Ok(CommandResult {
            aggregate,
            events,
            new_version,
        })
    }

    fn build_envelopes(
        &self,
        transfer_id: TransferId,
        current_version: Version,
        events: &[A::Event],
    ) -> Result<Vec<EventEnvelope>, DomainError>
    where
        A::Event: Serialize,
    {
        let mut envelopes = Vec::with_capacity(events.len());
        let mut version = current_version;

        for event in events {
            version = version.next();
            let envelope = EventEnvelope::builder()
                .transfer_id(transfer_id)
                .event_type(event.event_type())
                .version(version)
                .metadata("aggregate_type", serde_json::json!(A::aggregate_type()))
                .payload(event)?
                .build()
                .ok_or(DomainError::IncompleteEnvelope)?;
            envelopes.push(envelope);
        }

        Ok(envelopes)
    }
}
