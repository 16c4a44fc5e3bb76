//! Duel Room
//!
//! The pairing entity: up to two players in join order, a status, and the
//! per-room sequence counter stamped onto relayed duel and turn events.

use std::fmt;
use serde::{Serialize, Deserialize};

use crate::duel::session::SessionId;
use crate::duel::RoomError;

/// Maximum players in a duel room.
pub const MAX_PLAYERS: usize = 2;

/// Unique room identifier (UUID v4). Also the room's routing key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub uuid::Uuid);

impl RoomId {
    /// Generate a fresh random identifier.
    pub fn new_random() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Parse a room code sent by a client.
    pub fn parse(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s.trim()).ok().map(Self)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Room status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    /// Fewer than two players have joined.
    Waiting,
    /// Both seats filled; gameplay messages are relayed.
    Playing,
}

/// A seat in a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Player {
    /// Session occupying the seat.
    pub session_id: SessionId,
    /// True only for the first joiner.
    pub is_host: bool,
}

/// A duel room.
#[derive(Debug)]
pub struct Room {
    /// Room identifier.
    pub id: RoomId,
    players: Vec<Player>,
    status: RoomStatus,
    sequence: u64,
    /// Set once the room has been removed from the registry.
    retired: bool,
}

impl Room {
    /// Create an empty waiting room.
    pub fn new(id: RoomId) -> Self {
        Self {
            id,
            players: Vec::with_capacity(MAX_PLAYERS),
            status: RoomStatus::Waiting,
            sequence: 0,
            retired: false,
        }
    }

    /// Seat a session. The first seat is the host. Filling the last seat
    /// flips the room to `Playing`. Returns the 1-based player number.
    pub fn add_player(&mut self, session_id: SessionId) -> Result<usize, RoomError> {
        if self.retired {
            return Err(RoomError::RoomNotFound);
        }

        if self.is_member(&session_id) {
            return Err(RoomError::AlreadyInRoom);
        }

        if self.players.len() >= MAX_PLAYERS {
            return Err(RoomError::RoomFull);
        }

        let is_host = self.players.is_empty();
        self.players.push(Player { session_id, is_host });

        if self.players.len() == MAX_PLAYERS {
            self.status = RoomStatus::Playing;
        }

        Ok(self.players.len())
    }

    /// Remove a session's seat. Status is left as is.
    pub fn remove_player(&mut self, session_id: &SessionId) -> bool {
        let before = self.players.len();
        self.players.retain(|p| p.session_id != *session_id);
        self.players.len() != before
    }

    /// Whether the session holds a seat.
    pub fn is_member(&self, session_id: &SessionId) -> bool {
        self.players.iter().any(|p| p.session_id == *session_id)
    }

    /// Look up a session's seat.
    pub fn player(&self, session_id: &SessionId) -> Option<&Player> {
        self.players.iter().find(|p| p.session_id == *session_id)
    }

    /// Seated players in join order.
    pub fn players(&self) -> &[Player] {
        &self.players
    }

    /// Session ids in join order.
    pub fn player_ids(&self) -> Vec<SessionId> {
        self.players.iter().map(|p| p.session_id).collect()
    }

    /// Every member except `session_id`.
    pub fn others(&self, session_id: &SessionId) -> Vec<SessionId> {
        self.players.iter()
            .filter(|p| p.session_id != *session_id)
            .map(|p| p.session_id)
            .collect()
    }

    /// Player count.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Whether no seats are occupied.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Current status.
    pub fn status(&self) -> RoomStatus {
        self.status
    }

    /// Last sequence number handed out (0 before any).
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Pre-increment the sequence counter and return the new value.
    pub fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    /// Whether the room has left the registry.
    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// Mark the room as removed from the registry.
    pub(crate) fn retire(&mut self) {
        self.retired = true;
    }
}
