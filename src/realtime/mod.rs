//! Room-based realtime fan-out.
//!
//! A [`Realtime`] handle is created empty at startup, given its [`RoomTransport`] once with
//! [`Realtime::init`], and cloned into every component that emits. Using it before `init` fails
//! with [`RealtimeError::NotInitialized`].

pub mod counter;
pub mod rooms;
pub mod subscriptions;

pub use counter::{CountChange, CounterManager, Edge};
pub use rooms::{LocalRooms, RoomMessage};
pub use subscriptions::{TicketDirectory, ViewerSession};

use async_trait::async_trait;
use deskcore::channel::Channel;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    pub event: String,
    pub payload: Value,
}

impl RealtimeEvent {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("realtime transport used before initialization")]
    NotInitialized,
    #[error("realtime transport already initialized")]
    AlreadyInitialized,
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

/// The layer that actually multiplexes connections into rooms.
#[async_trait]
pub trait RoomTransport: Send + Sync {
    async fn join(&self, connection: ConnectionId, room: &Channel) -> Result<(), RealtimeError>;
    async fn leave(&self, connection: ConnectionId, room: &Channel) -> Result<(), RealtimeError>;
    /// Delivers `event` to every member of `room` and returns how many received it.
    async fn emit(&self, room: &Channel, event: RealtimeEvent) -> Result<usize, RealtimeError>;
}

#[derive(Clone, Default)]
pub struct Realtime {
    transport: Arc<OnceCell<Arc<dyn RoomTransport>>>,
}

impl Realtime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(&self, transport: Arc<dyn RoomTransport>) -> Result<(), RealtimeError> {
        self.transport
            .set(transport)
            .map_err(|_| RealtimeError::AlreadyInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.transport.get().is_some()
    }

    pub fn transport(&self) -> Result<Arc<dyn RoomTransport>, RealtimeError> {
        self.transport
            .get()
            .cloned()
            .ok_or(RealtimeError::NotInitialized)
    }

    pub async fn emit(
        &self,
        room: &Channel,
        event: &str,
        payload: Value,
    ) -> Result<usize, RealtimeError> {
        let delivered = self
            .transport()?
            .emit(room, RealtimeEvent::new(event, payload))
            .await?;
        log::debug!(target: "Realtime", "Emitted {event} to {room} ({delivered} receivers)");
        Ok(delivered)
    }
}
