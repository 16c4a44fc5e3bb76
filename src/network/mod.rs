//! Network Layer
//!
//! WebSocket transport for duel clients. Decodes frames into
//! [`protocol::ClientMessage`]s and hands them to the duel core.

pub mod protocol;
pub mod server;

pub use protocol::{
    ClientFrame, ClientMessage, ServerMessage, AckReply, AckResponse,
    CreatedRoom, JoinedRoom, DuelStartInfo, EndInfo, SenderRole,
};
pub use server::{RelayServer, ServerConfig, RelayServerError};
