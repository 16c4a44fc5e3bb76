//! Duel Core
//!
//! In-memory pairing and relay state. Nothing here touches sockets: peers
//! are reached through the channels held by the session table.
//!
//! ## Module Structure
//!
//! - `session`: live connections and their room binding
//! - `room`: the two-seat room, its status and sequence counter
//! - `registry`: ownership and lookup of rooms
//! - `relay`: gameplay message forwarding
//! - `lifecycle`: create, join, leave and disconnect handling
//!
//! ## Lock order
//!
//! A handler may hold one room's lock while briefly taking the session
//! table's or the registry's lock, never the reverse.

pub mod session;
pub mod room;
pub mod registry;
pub mod relay;
pub mod lifecycle;

pub use session::{SessionId, SessionTable, PeerSender};
pub use room::{Room, RoomId, RoomStatus, Player, MAX_PLAYERS};
pub use registry::{RoomRegistry, SharedRoom};
pub use relay::{EventRelay, RelayKind, RelayOutcome, DropReason};
pub use lifecycle::LifecycleCoordinator;

/// Caller-visible membership errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    /// No room with that id.
    #[error("房间不存在")]
    RoomNotFound,

    /// Both seats taken.
    #[error("房间已满")]
    RoomFull,

    /// Session already seated in that room.
    #[error("已在该房间中")]
    AlreadyInRoom,

    /// Session is no longer live.
    #[error("连接已断开")]
    NotConnected,

    /// Freshly generated id already registered.
    #[error("room id collision: {0}")]
    IdCollision(RoomId),
}
