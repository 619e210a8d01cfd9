//! Connection registry, rooms and fan-out.
//!
//! # Responsibilities
//! - Drive the handshake: validate the credential, then register the
//!   connection in its room
//! - At most one live connection per (room, identity); a newer handshake
//!   supersedes the older connection
//! - Broadcast to a room, pruning members whose delivery fails
//! - Presence announcements and the per-identity inbound message limit
//!
//! # Design Decisions
//! - Delivery never blocks: each connection has a bounded queue, and a full
//!   or closed queue closes that connection
//! - Rooms only hold Active connections; closing always removes the member
//! - A superseded connection gets a `superseded` notice and no `left` event

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::clock::SharedClock;
use crate::config::{RateLimitRule, RealtimeConfig};
use crate::observability::MetricsAggregator;
use crate::realtime::connection::{Connection, ConnectionId, ConnectionState};
use crate::realtime::messages::{ClientMessage, PresenceEvent, ServerMessage};
use crate::security::identity::{AuthError, IdentityValidator};
use crate::security::rate_limit::{identity_key, RateLimitDecision, RateLimiter};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RealtimeError {
    #[error("handshake rejected: {0}")]
    Unauthorized(#[from] AuthError),

    #[error("message rate exceeded, retry after {}s", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("connection is closed")]
    Closed,
}

impl RealtimeError {
    pub fn code(&self) -> &'static str {
        match self {
            RealtimeError::Unauthorized(_) => "unauthorized",
            RealtimeError::RateLimited { .. } => "rate_limited",
            RealtimeError::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientClosed,
    DeliveryFailed,
    Superseded,
    Shutdown,
}

/// Result of one fan-out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub pruned: Vec<ConnectionId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomSnapshot {
    pub room_id: String,
    pub members: Vec<String>,
    pub connections: usize,
}

/// Tracks every real-time connection and the rooms they belong to.
pub struct ConnectionManager {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    rooms: DashMap<String, HashSet<ConnectionId>>,
    sessions: DashMap<(String, String), ConnectionId>,
    identity: Arc<dyn IdentityValidator>,
    limiter: Arc<RateLimiter>,
    message_rule: RateLimitRule,
    metrics: Arc<MetricsAggregator>,
    clock: SharedClock,
    queue_capacity: usize,
}

impl ConnectionManager {
    pub fn new(
        config: &RealtimeConfig,
        identity: Arc<dyn IdentityValidator>,
        limiter: Arc<RateLimiter>,
        metrics: Arc<MetricsAggregator>,
        clock: SharedClock,
    ) -> Self {
        Self {
            connections: DashMap::new(),
            rooms: DashMap::new(),
            sessions: DashMap::new(),
            identity,
            limiter,
            message_rule: config.message_rate.clone(),
            metrics,
            clock,
            queue_capacity: config.outbound_queue.max(1),
        }
    }

    /// Outbound queue for a new connection.
    pub fn channel(&self) -> (mpsc::Sender<ServerMessage>, mpsc::Receiver<ServerMessage>) {
        mpsc::channel(self.queue_capacity)
    }

    /// Run the handshake for a new connection delivering into `outbound`.
    ///
    /// On success the connection is Active, registered in its room, and has
    /// a `welcome` queued. On failure it ends Closed without ever being
    /// visible to other members.
    pub async fn connect(
        &self,
        credential: Option<&str>,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Result<Arc<Connection>, RealtimeError> {
        let conn = Arc::new(Connection::new(outbound, self.clock.now_millis()));
        tracing::debug!(connection = %conn.id(), "Handshake started");

        let validated = match credential {
            Some(credential) => self.identity.validate(credential).await,
            None => Err(AuthError::Missing),
        };
        let identity = match validated {
            Ok(identity) => identity,
            Err(e) => {
                conn.close();
                tracing::warn!(connection = %conn.id(), error = %e, "Handshake rejected");
                return Err(RealtimeError::Unauthorized(e));
            }
        };

        if !conn.authenticate(identity) {
            return Err(RealtimeError::Closed);
        }
        self.activate(&conn)?;
        Ok(conn)
    }

    fn activate(&self, conn: &Arc<Connection>) -> Result<(), RealtimeError> {
        let superseded = self.claim_session(conn)?;
        self.publish(conn, superseded)
    }

    /// Make `conn` the identity's current session, superseding the previous
    /// one. Returns whether an Active connection was replaced.
    ///
    /// `conn` is registered before it is published in `sessions`, so a
    /// concurrent handshake that swaps it out can always find and close it.
    fn claim_session(&self, conn: &Arc<Connection>) -> Result<bool, RealtimeError> {
        let identity = conn.identity().ok_or(RealtimeError::Closed)?;
        let session = (identity.room_claim.clone(), identity.identity_id.clone());

        self.connections.insert(conn.id(), conn.clone());
        let previous = self
            .sessions
            .insert(session, conn.id())
            .and_then(|id| self.connections.get(&id).map(|entry| entry.value().clone()));

        let Some(previous) = previous else {
            return Ok(false);
        };
        let was_active = previous.is_active();
        // Best effort: a full queue still gets closed below.
        let _ = previous.try_deliver(ServerMessage::Superseded);
        self.close_connection(&previous, CloseReason::Superseded);
        Ok(was_active)
    }

    /// Activate a connection holding its session, join its room and announce it.
    fn publish(&self, conn: &Arc<Connection>, superseded: bool) -> Result<(), RealtimeError> {
        let identity = conn.identity().ok_or(RealtimeError::Closed)?;
        let room = identity.room_claim.clone();

        if !conn.activate() {
            // Superseded during the handshake; whoever closed it already
            // released the session.
            self.connections.remove(&conn.id());
            return Err(RealtimeError::Closed);
        }
        self.rooms.entry(room.clone()).or_default().insert(conn.id());

        // Closed while we were registering it.
        if conn.state() == ConnectionState::Closed {
            self.connections.remove(&conn.id());
            self.leave_room(&room, conn.id());
            return Err(RealtimeError::Closed);
        }

        let members = self.room_members(&room);
        self.send(
            conn,
            ServerMessage::Welcome {
                connection_id: conn.id().as_u64(),
                identity_id: identity.identity_id.clone(),
                room_id: room.clone(),
                members,
            },
        );
        if !superseded {
            self.broadcast(
                &room,
                &ServerMessage::Presence {
                    identity_id: identity.identity_id.clone(),
                    event: PresenceEvent::Joined,
                },
                Some(conn.id()),
            );
        }

        self.metrics.record_ws_connections(self.connections.len());
        tracing::info!(
            connection = %conn.id(),
            identity = %identity.identity_id,
            room = %room,
            superseded,
            "Connection active"
        );
        Ok(())
    }

    /// Deliver to every Active member of `room_id` except `exclude`.
    ///
    /// Members whose delivery fails are closed and removed from the room.
    pub fn broadcast(
        &self,
        room_id: &str,
        message: &ServerMessage,
        exclude: Option<ConnectionId>,
    ) -> BroadcastReport {
        let members: Vec<ConnectionId> = self
            .rooms
            .get(room_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default();

        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();
        for id in members {
            if Some(id) == exclude {
                continue;
            }
            let Some(conn) = self.connections.get(&id).map(|entry| entry.value().clone()) else {
                self.leave_room(room_id, id);
                continue;
            };
            match conn.try_deliver(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(connection = %id, room = %room_id, error = %e, "Delivery failed, pruning");
                    failed.push(conn);
                }
            }
        }

        for conn in failed {
            report.pruned.push(conn.id());
            if !self.close_connection(&conn, CloseReason::DeliveryFailed) {
                self.leave_room(room_id, conn.id());
            }
        }
        report
    }

    /// Handle one frame from an Active connection.
    pub fn handle_inbound(&self, conn: &Arc<Connection>, message: ClientMessage) -> Result<(), RealtimeError> {
        if !conn.is_active() {
            return Err(RealtimeError::Closed);
        }
        let identity = conn.identity().ok_or(RealtimeError::Closed)?;

        match message {
            ClientMessage::Ping => self.send(conn, ServerMessage::Pong),
            ClientMessage::Members => self.send(
                conn,
                ServerMessage::Members {
                    room_id: identity.room_claim.clone(),
                    identities: self.room_members(&identity.room_claim),
                },
            ),
            ClientMessage::Message { body } => {
                let key = identity_key(&self.message_rule.endpoint, &identity.identity_id);
                if let RateLimitDecision::Denied { retry_after, .. } = self.limiter.check(&key, &self.message_rule) {
                    tracing::debug!(connection = %conn.id(), identity = %identity.identity_id, "Message rate exceeded");
                    self.send(
                        conn,
                        ServerMessage::Error {
                            code: "rate_limited".to_string(),
                            message: "too many messages".to_string(),
                            retry_after: Some(retry_after.as_secs()),
                        },
                    );
                    return Err(RealtimeError::RateLimited { retry_after });
                }

                self.metrics.record_ws_message();
                let report = self.broadcast(
                    &identity.room_claim,
                    &ServerMessage::Message {
                        from: identity.identity_id.clone(),
                        room_id: identity.room_claim.clone(),
                        body,
                        sent_at: self.clock.now_millis(),
                    },
                    Some(conn.id()),
                );
                self.send(
                    conn,
                    ServerMessage::Ack {
                        delivered: report.delivered,
                    },
                );
            }
        }
        Ok(())
    }

    /// Queue a message for one connection, closing it if the queue is
    /// unusable.
    pub fn send(&self, conn: &Arc<Connection>, message: ServerMessage) {
        if let Err(e) = conn.try_deliver(message) {
            tracing::warn!(connection = %conn.id(), error = %e, "Direct delivery failed");
            self.close_connection(conn, CloseReason::DeliveryFailed);
        }
    }

    /// Close one connection, announcing it to the room.
    pub fn close(&self, id: ConnectionId) {
        if let Some(conn) = self.connections.get(&id).map(|entry| entry.value().clone()) {
            self.close_connection(&conn, CloseReason::ClientClosed);
        }
    }

    /// Close every connection, e.g. on shutdown.
    pub fn close_all(&self) -> usize {
        let all: Vec<Arc<Connection>> = self.connections.iter().map(|e| e.value().clone()).collect();
        let closed = all
            .iter()
            .filter(|conn| self.close_connection(conn, CloseReason::Shutdown))
            .count();
        tracing::info!(closed, "Closed all real-time connections");
        closed
    }

    /// Returns false if the connection was already closed.
    fn close_connection(&self, conn: &Arc<Connection>, reason: CloseReason) -> bool {
        if !conn.close() {
            return false;
        }
        self.connections.remove(&conn.id());
        self.metrics.record_ws_connections(self.connections.len());

        let Some(identity) = conn.identity() else {
            return true;
        };
        let room = identity.room_claim.as_str();
        self.leave_room(room, conn.id());
        let session = (room.to_string(), identity.identity_id.clone());
        let was_current = self
            .sessions
            .remove_if(&session, |_, id| *id == conn.id())
            .is_some();

        tracing::info!(
            connection = %conn.id(),
            identity = %identity.identity_id,
            room = %room,
            reason = ?reason,
            "Connection closed"
        );

        if was_current && !matches!(reason, CloseReason::Superseded | CloseReason::Shutdown) {
            self.broadcast(
                room,
                &ServerMessage::Presence {
                    identity_id: identity.identity_id.clone(),
                    event: PresenceEvent::Left,
                },
                None,
            );
        }
        true
    }

    fn leave_room(&self, room_id: &str, id: ConnectionId) {
        if let Some(mut members) = self.rooms.get_mut(room_id) {
            members.remove(&id);
        }
        self.rooms.remove_if(room_id, |_, members| members.is_empty());
    }

    /// Distinct identities present in `room_id`, sorted.
    pub fn room_members(&self, room_id: &str) -> Vec<String> {
        let ids: Vec<ConnectionId> = self
            .rooms
            .get(room_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default();
        let mut identities: Vec<String> = ids
            .iter()
            .filter_map(|id| self.connections.get(id))
            .filter_map(|conn| conn.identity_id().map(str::to_string))
            .collect();
        identities.sort();
        identities.dedup();
        identities
    }

    pub fn room_size(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map(|m| m.len()).unwrap_or(0)
    }

    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(&id).map(|entry| entry.value().clone())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn rooms(&self) -> Vec<RoomSnapshot> {
        let mut ids: Vec<String> = self.rooms.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids.into_iter()
            .map(|room_id| RoomSnapshot {
                members: self.room_members(&room_id),
                connections: self.room_size(&room_id),
                room_id,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RateLimitScope;
    use crate::security::identity::{Identity, StaticTokenValidator};

    fn manager(queue: usize) -> ConnectionManager {
        manager_with_rule(queue, RateLimitRule::new("ws", 2, 10, RateLimitScope::PerUser))
    }

    fn manager_with_rule(queue: usize, message_rate: RateLimitRule) -> ConnectionManager {
        let clock = ManualClock::new(0);
        let identity = StaticTokenValidator::new()
            .with_token("t-mom", "mom", "family-1")
            .with_token("t-dad", "dad", "family-1")
            .with_token("t-kid", "kid", "family-1")
            .with_token("t-other", "neighbour", "family-2");
        let config = RealtimeConfig {
            outbound_queue: queue,
            message_rate,
            ..RealtimeConfig::default()
        };
        ConnectionManager::new(
            &config,
            Arc::new(identity),
            Arc::new(RateLimiter::new(clock.clone())),
            Arc::new(MetricsAggregator::default()),
            clock,
        )
    }

    async fn join(
        manager: &ConnectionManager,
        token: &str,
    ) -> (Arc<Connection>, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = manager.channel();
        let conn = manager.connect(Some(token), tx).await.unwrap();
        (conn, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn handshake_rejects_bad_credentials() {
        let manager = manager(8);
        let (tx, _rx) = manager.channel();
        assert_eq!(
            manager.connect(Some("forged"), tx).await.unwrap_err(),
            RealtimeError::Unauthorized(AuthError::Invalid)
        );
        let (tx, _rx) = manager.channel();
        assert_eq!(
            manager.connect(None, tx).await.unwrap_err(),
            RealtimeError::Unauthorized(AuthError::Missing)
        );
        assert_eq!(manager.connection_count(), 0);
        assert_eq!(manager.room_size("family-1"), 0);
    }

    #[tokio::test]
    async fn welcome_and_presence_on_join() {
        let manager = manager(8);
        let (_mom, mut mom_rx) = join(&manager, "t-mom").await;
        let (dad, mut dad_rx) = join(&manager, "t-dad").await;

        match drain(&mut dad_rx).first() {
            Some(ServerMessage::Welcome { members, connection_id, .. }) => {
                assert_eq!(members, &vec!["dad".to_string(), "mom".to_string()]);
                assert_eq!(*connection_id, dad.id().as_u64());
            }
            other => panic!("expected welcome, got {other:?}"),
        }
        let mom_seen = drain(&mut mom_rx);
        assert!(mom_seen.contains(&ServerMessage::Presence {
            identity_id: "dad".into(),
            event: PresenceEvent::Joined,
        }));
    }

    #[tokio::test]
    async fn broadcast_reaches_everyone_but_the_sender_and_prunes_dead_members() {
        let manager = manager(8);
        let (mom, mut mom_rx) = join(&manager, "t-mom").await;
        let (_dad, mut dad_rx) = join(&manager, "t-dad").await;
        let (kid, kid_rx) = join(&manager, "t-kid").await;
        drain(&mut mom_rx);
        drain(&mut dad_rx);

        let note = ServerMessage::Message {
            from: "mom".into(),
            room_id: "family-1".into(),
            body: "hi".into(),
            sent_at: 0,
        };
        let report = manager.broadcast("family-1", &note, Some(mom.id()));
        assert_eq!(report.delivered, 2);
        assert!(report.pruned.is_empty());
        assert_eq!(drain(&mut dad_rx), vec![note.clone()]);

        // Sever the kid's transport.
        drop(kid_rx);
        let report = manager.broadcast("family-1", &note, Some(mom.id()));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.pruned, vec![kid.id()]);
        assert_eq!(kid.state(), ConnectionState::Closed);
        assert_eq!(manager.room_size("family-1"), 2);

        let report = manager.broadcast("family-1", &note, Some(mom.id()));
        assert_eq!(report.delivered, 1);
        assert!(report.pruned.is_empty());

        // The others heard the kid leave.
        assert!(drain(&mut mom_rx).contains(&ServerMessage::Presence {
            identity_id: "kid".into(),
            event: PresenceEvent::Left,
        }));
    }

    #[tokio::test]
    async fn full_queue_closes_the_slow_member() {
        let manager = manager(1);
        let (mom, mut mom_rx) = join(&manager, "t-mom").await;
        drain(&mut mom_rx);
        let (slow, _slow_rx) = join(&manager, "t-dad").await;
        drain(&mut mom_rx);

        // Dad's single slot still holds the welcome.
        let report = manager.broadcast("family-1", &ServerMessage::Pong, Some(mom.id()));
        assert_eq!(report.pruned, vec![slow.id()]);
        assert_eq!(manager.room_members("family-1"), vec!["mom".to_string()]);
    }

    #[tokio::test]
    async fn newer_handshake_supersedes_the_older_connection() {
        let manager = manager(8);
        let (_dad, mut dad_rx) = join(&manager, "t-dad").await;
        let (first, mut first_rx) = join(&manager, "t-mom").await;
        drain(&mut dad_rx);
        drain(&mut first_rx);

        let (second, _second_rx) = join(&manager, "t-mom").await;
        assert_eq!(first.state(), ConnectionState::Closed);
        assert!(second.is_active());
        assert_eq!(drain(&mut first_rx), vec![ServerMessage::Superseded]);
        assert_eq!(manager.room_size("family-1"), 2);

        // No left/joined churn for a supersede.
        assert!(drain(&mut dad_rx).is_empty());
    }

    #[tokio::test]
    async fn inbound_messages_are_fanned_out_and_limited() {
        let manager = manager(8);
        let (mom, mut mom_rx) = join(&manager, "t-mom").await;
        let (_kid, mut kid_rx) = join(&manager, "t-kid").await;
        let (_other, mut other_rx) = join(&manager, "t-other").await;
        drain(&mut mom_rx);
        drain(&mut kid_rx);
        drain(&mut other_rx);

        for _ in 0..2 {
            manager
                .handle_inbound(&mom, ClientMessage::Message { body: "chores".into() })
                .unwrap();
        }
        assert_eq!(
            drain(&mut mom_rx),
            vec![ServerMessage::Ack { delivered: 1 }, ServerMessage::Ack { delivered: 1 }]
        );
        assert_eq!(drain(&mut kid_rx).len(), 2);
        assert!(drain(&mut other_rx).is_empty());

        let err = manager
            .handle_inbound(&mom, ClientMessage::Message { body: "again".into() })
            .unwrap_err();
        assert!(matches!(err, RealtimeError::RateLimited { .. }));
        assert!(matches!(
            drain(&mut mom_rx).as_slice(),
            [ServerMessage::Error { retry_after: Some(_), .. }]
        ));
        assert!(drain(&mut kid_rx).is_empty());

        manager.handle_inbound(&mom, ClientMessage::Ping).unwrap();
        assert_eq!(drain(&mut mom_rx), vec![ServerMessage::Pong]);
    }

    #[tokio::test]
    async fn disconnect_and_close_all() {
        let manager = manager(8);
        let (mom, _mom_rx) = join(&manager, "t-mom").await;
        let (kid, mut kid_rx) = join(&manager, "t-kid").await;
        drain(&mut kid_rx);

        manager.close(mom.id());
        assert_eq!(mom.state(), ConnectionState::Closed);
        assert!(manager.handle_inbound(&mom, ClientMessage::Ping).is_err());
        assert_eq!(
            drain(&mut kid_rx),
            vec![ServerMessage::Presence {
                identity_id: "mom".into(),
                event: PresenceEvent::Left,
            }]
        );

        assert_eq!(manager.close_all(), 1);
        assert_eq!(kid.state(), ConnectionState::Closed);
        assert_eq!(manager.connection_count(), 0);
        assert!(manager.rooms().is_empty());
        assert_eq!(manager.room_count(), 0);
    }

    #[tokio::test]
    async fn message_limit_is_per_identity_whatever_the_scope() {
        let manager = manager_with_rule(8, RateLimitRule::new("ws", 2, 10, RateLimitScope::Global));
        let (mom, _mom_rx) = join(&manager, "t-mom").await;
        let (dad, _dad_rx) = join(&manager, "t-dad").await;

        for _ in 0..2 {
            manager
                .handle_inbound(&mom, ClientMessage::Message { body: "laundry".into() })
                .unwrap();
        }
        assert!(manager
            .handle_inbound(&mom, ClientMessage::Message { body: "laundry".into() })
            .is_err());
        manager
            .handle_inbound(&dad, ClientMessage::Message { body: "on it".into() })
            .unwrap();
    }

    fn authenticated(
        manager: &ConnectionManager,
        identity_id: &str,
    ) -> (Arc<Connection>, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = manager.channel();
        let conn = Arc::new(Connection::new(tx, 0));
        assert!(conn.authenticate(Identity {
            identity_id: identity_id.to_string(),
            room_claim: "family-1".to_string(),
            permissions: Vec::new(),
        }));
        (conn, rx)
    }

    #[tokio::test]
    async fn interleaved_handshakes_leave_one_session() {
        let manager = manager(8);
        let (_mom, mut mom_rx) = join(&manager, "t-mom").await;
        drain(&mut mom_rx);
        let (first, mut first_rx) = authenticated(&manager, "kid");
        let (second, mut second_rx) = authenticated(&manager, "kid");

        // The second handshake claims the session before the first activates.
        assert!(!manager.claim_session(&first).unwrap());
        assert!(!manager.claim_session(&second).unwrap());
        assert_eq!(first.state(), ConnectionState::Closed);

        assert_eq!(manager.publish(&first, false).unwrap_err(), RealtimeError::Closed);
        manager.publish(&second, false).unwrap();

        assert_eq!(drain(&mut first_rx), vec![ServerMessage::Superseded]);
        assert!(matches!(drain(&mut second_rx).first(), Some(ServerMessage::Welcome { .. })));
        assert_eq!(
            drain(&mut mom_rx),
            vec![ServerMessage::Presence {
                identity_id: "kid".into(),
                event: PresenceEvent::Joined,
            }]
        );
        assert_eq!(manager.connection_count(), 2);
        assert_eq!(manager.room_size("family-1"), 2);
        assert_eq!(manager.room_members("family-1"), vec!["kid".to_string(), "mom".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_handshakes_for_one_identity_keep_one_active() {
        for _ in 0..200 {
            let manager = Arc::new(manager(8));
            let handshakes: Vec<_> = (0..2)
                .map(|_| {
                    let manager = manager.clone();
                    tokio::spawn(async move {
                        let (tx, rx) = manager.channel();
                        manager.connect(Some("t-kid"), tx).await.map(|conn| (conn, rx))
                    })
                })
                .collect();

            let mut connections = Vec::new();
            for handshake in handshakes {
                if let Ok((conn, rx)) = handshake.await.unwrap() {
                    connections.push((conn, rx));
                }
            }
            let active = connections.iter().filter(|(conn, _)| conn.is_active()).count();
            assert_eq!(active, 1);
            assert_eq!(manager.connection_count(), 1);
            assert_eq!(manager.room_size("family-1"), 1);
        }
    }
}
