//! In-process room registry backed by `tokio::sync::broadcast` channels.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use common::{Role, UserId};
use tokio::sync::broadcast;

use crate::RealtimeEvent;

/// Buffer per room. Slow receivers observe `RecvError::Lagged`.
const ROOM_CAPACITY: usize = 256;

/// Delivery target for realtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    /// Every socket of one user.
    User(UserId),
    /// Every socket connected with a given role.
    Role(Role),
}

impl std::fmt::Display for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Room::User(id) => write!(f, "user:{id}"),
            Room::Role(role) => write!(f, "role:{role}"),
        }
    }
}

/// Publishing side of the realtime boundary.
///
/// Delivery is best-effort: publishing to a room nobody listens on is not an
/// error.
pub trait RealtimeChannel: Send + Sync {
    fn publish(&self, room: Room, event: RealtimeEvent);
}

/// Fan-out hub holding one broadcast channel per room.
///
/// Cloning shares the same rooms.
#[derive(Debug, Clone, Default)]
pub struct RealtimeHub {
    rooms: Arc<RwLock<HashMap<Room, broadcast::Sender<RealtimeEvent>>>>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins a room, creating it on first use.
    pub fn subscribe(&self, room: Room) -> broadcast::Receiver<RealtimeEvent> {
        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        rooms
            .entry(room)
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .subscribe()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Number of live receivers in a room.
    pub fn subscriber_count(&self, room: Room) -> usize {
        let rooms = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
        rooms.get(&room).map_or(0, |tx| tx.receiver_count())
    }

    /// Drops rooms whose subscribers have all disconnected.
    pub fn prune(&self) -> usize {
        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        let before = rooms.len();
        rooms.retain(|_, tx| tx.receiver_count() > 0);
        before - rooms.len()
    }
}

impl RealtimeChannel for RealtimeHub {
    fn publish(&self, room: Room, event: RealtimeEvent) {
        let rooms = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
        let delivered = rooms
            .get(&room)
            .and_then(|tx| tx.send(event.clone()).ok())
            .unwrap_or(0);

        metrics::counter!("realtime_events_published_total", "event" => event.name())
            .increment(1);
        tracing::debug!(
            %room,
            event = event.name(),
            transfer_id = %event.transfer_id(),
            delivered,
            "realtime event published"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RetractionEvent, StatusChangedEvent};
    use chrono::Utc;
    use common::TransferId;

    fn retraction(transfer_id: TransferId) -> RealtimeEvent {
        RealtimeEvent::OfferRetracted(RetractionEvent { transfer_id })
    }

    #[tokio::test]
    async fn user_room_only_reaches_that_user() {
        let hub = RealtimeHub::new();
        let alice = UserId::new();
        let bob = UserId::new();
        let mut alice_rx = hub.subscribe(Room::User(alice));
        let mut bob_rx = hub.subscribe(Room::User(bob));

        let transfer_id = TransferId::new();
        hub.publish(Room::User(alice), retraction(transfer_id));

        assert_eq!(alice_rx.recv().await.unwrap(), retraction(transfer_id));
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn role_room_reaches_every_member() {
        let hub = RealtimeHub::new();
        let mut first = hub.subscribe(Room::Role(Role::Admin));
        let mut second = hub.subscribe(Room::Role(Role::Admin));
        assert_eq!(hub.subscriber_count(Room::Role(Role::Admin)), 2);

        let event = RealtimeEvent::StatusChanged(StatusChangedEvent {
            transfer_id: TransferId::new(),
            from: "created".to_string(),
            to: "assigned".to_string(),
            drover_id: Some(UserId::new()),
            version: 2,
            changed_at: Utc::now(),
        });
        hub.publish(Room::Role(Role::Admin), event.clone());

        assert_eq!(first.recv().await.unwrap(), event);
        assert_eq!(second.recv().await.unwrap(), event);
    }

    #[test]
    fn publishing_to_empty_room_is_silent() {
        let hub = RealtimeHub::new();
        hub.publish(Room::Role(Role::Drover), retraction(TransferId::new()));
        assert_eq!(hub.subscriber_count(Room::Role(Role::Drover)), 0);
    }

    #[test]
    fn prune_removes_abandoned_rooms() {
        let hub = RealtimeHub::new();
        let rx = hub.subscribe(Room::User(UserId::new()));
        let _kept = hub.subscribe(Room::Role(Role::Client));
        drop(rx);

        assert_eq!(hub.prune(), 1);
        assert_eq!(hub.subscriber_count(Room::Role(Role::Client)), 1);
    }

    #[test]
    fn room_is_dropped_after_its_last_subscriber_leaves() {
        let hub = RealtimeHub::new();
        let user = Room::User(UserId::new());
        let first = hub.subscribe(user);
        let second = hub.subscribe(user);

        drop(first);
        assert_eq!(hub.prune(), 0);
        assert_eq!(hub.subscriber_count(user), 1);

        drop(second);
        assert_eq!(hub.prune(), 1);
        assert_eq!(hub.room_count(), 0);
    }

    #[test]
    fn departed_users_leave_no_rooms_behind() {
        let hub = RealtimeHub::new();
        for _ in 0..1000 {
            drop(hub.subscribe(Room::User(UserId::new())));
        }
        assert_eq!(hub.room_count(), 1000);

        assert_eq!(hub.prune(), 1000);
        assert_eq!(hub.room_count(), 0);
    }
}
