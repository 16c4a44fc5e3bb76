//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`.
//! Requests that expect a reply may carry an integer `"ack"` field, echoed
//! back in the matching `ack` event.

use serde::{Serialize, Deserialize};
use serde_json::Value;

use crate::duel::room::RoomId;
use crate::duel::session::SessionId;
use crate::duel::RoomError;

/// `duelEnd` reason sent when the opponent's connection drops.
pub const REASON_OPPONENT_DISCONNECTED: &str = "对手断开连接";

/// `gameOver` reason sent when the opponent leaves the room.
pub const REASON_OPPONENT_LEFT: &str = "对手离开房间";

/// `shutdown` reason sent when the server stops.
pub const REASON_SERVER_SHUTDOWN: &str = "服务器关闭";

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Open a new room as host.
    CreateDuelRoom,

    /// Take the second seat of an existing room.
    JoinDuelRoom(String),

    /// Sequenced gameplay event.
    DuelEvent(Value),

    /// End of turn (`{cards}`), sequenced with duel events.
    TurnOver(Value),

    /// Deck list (`[{name, id}]`), relayed verbatim.
    #[serde(alias = "syncInitDeck")]
    InitDeck(Value),

    /// Chat line, relayed in any room state.
    BattleMessage(Value),

    /// Leave the current room, ending it.
    LeaveRoom,
}

/// A decoded client frame.
#[derive(Debug, Clone)]
pub struct ClientFrame {
    /// Reply correlation id, if the client asked for one.
    pub ack: Option<u64>,
    /// The message itself.
    pub message: ClientMessage,
}

impl ClientFrame {
    /// Decode a text frame.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        let mut value: Value = serde_json::from_str(s)?;
        let ack = match &mut value {
            Value::Object(map) => map.remove("ack").and_then(|a| a.as_u64()),
            _ => None,
        };
        let message = serde_json::from_value(value)?;
        Ok(Self { ack, message })
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Reply to `createDuelRoom` / `joinDuelRoom`.
    Ack(AckReply),

    /// Both seats filled; sent to every member.
    DuelStart(DuelStartInfo),

    /// Opponent's duel event, stamped with `sequence`.
    DuelEvent(Value),

    /// Opponent's turn end, stamped with `sequence`.
    TurnOver(Value),

    /// Opponent's deck list.
    SyncInitDeck(Value),

    /// Opponent's chat line, labeled with `sender` and `isOpponent`.
    BattleMessage(Value),

    /// Opponent disconnected mid-duel.
    DuelEnd(EndInfo),

    /// Opponent left the room.
    GameOver(EndInfo),

    /// Server is shutting down.
    Shutdown(EndInfo),
}

/// Reply to a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckReply {
    /// Correlation id from the request.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<u64>,
    /// Reply body.
    pub response: AckResponse,
}

/// Reply body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AckResponse {
    /// Room created.
    Created(CreatedRoom),
    /// Room joined.
    Joined(JoinedRoom),
    /// Request refused.
    Rejected(Rejection),
}

/// Result of `createDuelRoom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedRoom {
    /// New room identifier.
    pub room_id: RoomId,
    /// Always 1.
    pub player_number: usize,
}

/// Result of `joinDuelRoom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedRoom {
    /// Always true.
    pub success: bool,
    /// Seat taken (1-based).
    pub player_number: usize,
}

/// A refused request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Human-readable reason.
    pub error: String,
}

impl From<RoomError> for Rejection {
    fn from(err: RoomError) -> Self {
        Self { error: err.to_string() }
    }
}

/// Payload of `duelStart`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuelStartInfo {
    /// Players in join order.
    pub players: Vec<SessionId>,
    /// Sequence value the duel starts from.
    pub initial_sequence: u64,
}

/// Payload of `duelEnd`, `gameOver` and `shutdown`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndInfo {
    /// Human-readable reason.
    pub reason: String,
}

impl EndInfo {
    /// Build from a reason string.
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// Author label on relayed chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    /// Room creator.
    Host,
    /// Second player.
    Guest,
}

impl SenderRole {
    /// Label for a player by host flag.
    pub fn from_host_flag(is_host: bool) -> Self {
        if is_host { SenderRole::Host } else { SenderRole::Guest }
    }

    /// Wire string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderRole::Host => "host",
            SenderRole::Guest => "guest",
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
