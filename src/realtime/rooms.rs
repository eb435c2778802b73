use super::{ConnectionId, RealtimeError, RealtimeEvent, RoomTransport};
use async_trait::async_trait;
use dashmap::DashMap;
use deskcore::channel::Channel;
use log::{debug, trace};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub struct RoomMessage {
    pub room: Channel,
    pub event: RealtimeEvent,
}

/// In-process room transport. Each connection gets an unbounded queue of the room messages
/// addressed to it.
#[derive(Default)]
pub struct LocalRooms {
    next_id: AtomicU64,
    connections: DashMap<ConnectionId, mpsc::UnboundedSender<RoomMessage>>,
    rooms: DashMap<Channel, HashSet<ConnectionId>>,
}

impl LocalRooms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<RoomMessage>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(id, tx);
        debug!(target: "Realtime/Rooms", "{id} connected");
        (id, rx)
    }

    /// Drops the connection and its memberships.
    pub fn disconnect(&self, id: ConnectionId) {
        self.connections.remove(&id);
        self.rooms.retain(|_, members| {
            members.remove(&id);
            !members.is_empty()
        });
        debug!(target: "Realtime/Rooms", "{id} disconnected");
    }

    pub fn members(&self, room: &Channel) -> Vec<ConnectionId> {
        let mut members: Vec<_> = self
            .rooms
            .get(room)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default();
        members.sort();
        members
    }
}

#[async_trait]
impl RoomTransport for LocalRooms {
    async fn join(&self, connection: ConnectionId, room: &Channel) -> Result<(), RealtimeError> {
        if !self.connections.contains_key(&connection) {
            return Err(RealtimeError::UnknownConnection(connection));
        }
        self.rooms.entry(*room).or_default().insert(connection);
        trace!(target: "Realtime/Rooms", "{connection} joined {room}");
        Ok(())
    }

    async fn leave(&self, connection: ConnectionId, room: &Channel) -> Result<(), RealtimeError> {
        self.rooms.remove_if_mut(room, |_, members| {
            members.remove(&connection);
            members.is_empty()
        });
        trace!(target: "Realtime/Rooms", "{connection} left {room}");
        Ok(())
    }

    async fn emit(&self, room: &Channel, event: RealtimeEvent) -> Result<usize, RealtimeError> {
        let mut delivered = 0;
        for member in self.members(room) {
            let Some(sender) = self.connections.get(&member).map(|s| s.value().clone()) else {
                continue;
            };
            let message = RoomMessage {
                room: *room,
                event: event.clone(),
            };
            if sender.send(message).is_ok() {
                delivered += 1;
            }
        }
        Ok(delivered)
    }
}
