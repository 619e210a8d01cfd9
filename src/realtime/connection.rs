//! Real-time connection state machine.
//!
//! # States
//! ```text
//! Connecting → Authenticated: credential validated
//! Authenticated → Active: registered in its room
//! any → Closed: client left, delivery failed, superseded, or shutdown
//! ```
//!
//! State lives in an atomic so delivery paths can check it without taking
//! any lock. `Closed` is terminal.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::OnceLock;

use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::realtime::messages::ServerMessage;
use crate::security::identity::Identity;

/// Only uniqueness matters, so relaxed ordering is enough.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Authenticated = 1,
    Active = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Authenticated,
            2 => ConnectionState::Active,
            _ => ConnectionState::Closed,
        }
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("outbound queue is full")]
    Full,

    #[error("connection is closed")]
    Closed,
}

/// One client's live channel.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    state: AtomicU8,
    identity: OnceLock<Identity>,
    outbound: mpsc::Sender<ServerMessage>,
    closed: watch::Sender<bool>,
    connected_at: u64,
}

impl Connection {
    pub fn new(outbound: mpsc::Sender<ServerMessage>, connected_at: u64) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            id: ConnectionId::new(),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            identity: OnceLock::new(),
            outbound,
            closed,
            connected_at,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.get()
    }

    pub fn identity_id(&self) -> Option<&str> {
        self.identity().map(|i| i.identity_id.as_str())
    }

    pub fn room_id(&self) -> Option<&str> {
        self.identity().map(|i| i.room_claim.as_str())
    }

    pub fn connected_at(&self) -> u64 {
        self.connected_at
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Attach the validated identity. Fails if the connection moved on.
    pub fn authenticate(&self, identity: Identity) -> bool {
        if self.identity.set(identity).is_err() {
            return false;
        }
        self.transition(ConnectionState::Connecting, ConnectionState::Authenticated)
    }

    pub fn activate(&self) -> bool {
        self.transition(ConnectionState::Authenticated, ConnectionState::Active)
    }

    /// Move to `Closed`. Returns false if it was already closed.
    pub fn close(&self) -> bool {
        let previous = self.state.swap(ConnectionState::Closed as u8, Ordering::AcqRel);
        if previous == ConnectionState::Closed as u8 {
            return false;
        }
        self.closed.send_replace(true);
        true
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Queue `message` without waiting.
    pub fn try_deliver(&self, message: ServerMessage) -> Result<(), DeliveryError> {
        if self.state() == ConnectionState::Closed {
            return Err(DeliveryError::Closed);
        }
        self.outbound.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}
