//! Session Table
//!
//! One entry per live connection: the connection's outbound channel and the
//! single room it is currently bound to. Rooms only ever hold a `SessionId`;
//! the channel is resolved here at send time.

use std::collections::BTreeMap;
use std::fmt;
use serde::{Serialize, Deserialize};
use tokio::sync::{mpsc, RwLock};
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::duel::room::RoomId;
use crate::network::protocol::ServerMessage;

/// Unique connection identifier (UUID v4, assigned at connect time).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub uuid::Uuid);

impl SessionId {
    /// Generate a fresh random identifier.
    pub fn new_random() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Channel carrying messages to one connection's writer task.
pub type PeerSender = mpsc::Sender<ServerMessage>;

/// A live connection.
#[derive(Debug)]
pub struct Session {
    /// Connection identifier.
    pub id: SessionId,
    /// Room this session is bound to, if any.
    pub current_room: Option<RoomId>,
    sender: PeerSender,
}

/// All live sessions, keyed by id.
pub struct SessionTable {
    sessions: RwLock<BTreeMap<SessionId, Session>>,
}

impl SessionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a new connection.
    pub async fn connect(&self, id: SessionId, sender: PeerSender) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(id, Session {
            id,
            current_room: None,
            sender,
        });
    }

    /// Remove a connection. Returns the removed session, or `None` if it was
    /// already gone.
    pub async fn disconnect(&self, id: &SessionId) -> Option<Session> {
        self.sessions.write().await.remove(id)
    }

    /// Room the session is bound to.
    pub async fn current_room(&self, id: &SessionId) -> Option<RoomId> {
        self.sessions.read().await.get(id).and_then(|s| s.current_room)
    }

    /// Bind a session to a room. Returns false if the session is not live.
    pub async fn bind_room(&self, id: &SessionId, room_id: RoomId) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(id) {
            Some(session) => {
                session.current_room = Some(room_id);
                true
            }
            None => false,
        }
    }

    /// Take the session's binding, leaving it unbound.
    pub async fn take_room(&self, id: &SessionId) -> Option<RoomId> {
        let mut sessions = self.sessions.write().await;
        sessions.get_mut(id).and_then(|s| s.current_room.take())
    }

    /// Clear the session's binding, but only if it still points at `room_id`.
    pub async fn unbind_room(&self, id: &SessionId, room_id: &RoomId) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(id) {
            if session.current_room.as_ref() == Some(room_id) {
                session.current_room = None;
            }
        }
    }

    /// Deliver one message to each recipient in order. Best effort: missing
    /// sessions, closed channels and full queues are skipped, so a peer that
    /// stops reading never blocks the caller. Returns how many were queued.
    pub async fn send_to_all(&self, recipients: &[SessionId], message: &ServerMessage) -> usize {
        let senders: Vec<(SessionId, PeerSender)> = {
            let sessions = self.sessions.read().await;
            recipients.iter()
                .filter_map(|id| sessions.get(id).map(|s| (*id, s.sender.clone())))
                .collect()
        };

        let mut delivered = 0;
        for (id, sender) in senders {
            match sender.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(session = %id, "Outbound queue full, message dropped");
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether no sessions are live.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}
