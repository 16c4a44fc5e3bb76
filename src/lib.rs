//! # Duel Relay Server
//!
//! Pairs two WebSocket clients into a duel room and relays their gameplay
//! events, stamping duel and turn events with a per-room sequence number.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    DUEL RELAY SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  duel/           - In-memory room state                      │
//! │  ├── session.rs  - Live connections and room bindings        │
//! │  ├── room.rs     - Two-seat room, status, sequence           │
//! │  ├── registry.rs - Room ownership and lookup                 │
//! │  ├── relay.rs    - Gameplay message forwarding               │
//! │  └── lifecycle.rs- Create / join / leave / disconnect        │
//! │                                                              │
//! │  network/        - Transport                                 │
//! │  ├── server.rs   - WebSocket server                          │
//! │  └── protocol.rs - Message types                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Room lifecycle
//!
//! A room is created `Waiting` with its host, flips to `Playing` when the
//! second player joins, and is removed from the registry when a player
//! leaves, when a player disconnects mid-duel, or when a waiting room
//! empties. Removal is final: room ids are never reused.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod duel;
pub mod network;

// Re-export commonly used types
pub use duel::{
    EventRelay, LifecycleCoordinator, RoomRegistry, SessionTable,
    RoomId, SessionId, RoomStatus, RoomError,
};
pub use network::{RelayServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
