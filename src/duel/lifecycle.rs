//! Lifecycle Coordinator
//!
//! Drives rooms through `Waiting -> Playing -> removed` in response to
//! create, join, leave and disconnect. Removing a room from the registry is
//! the terminal transition; remaining members are unbound and notified.

use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::duel::registry::RoomRegistry;
use crate::duel::room::{Room, RoomId, RoomStatus, MAX_PLAYERS};
use crate::duel::session::{PeerSender, SessionId, SessionTable};
use crate::duel::RoomError;
use crate::network::protocol::{
    CreatedRoom, DuelStartInfo, EndInfo, JoinedRoom, ServerMessage,
    REASON_OPPONENT_DISCONNECTED, REASON_OPPONENT_LEFT,
};

/// Room membership and state-machine driver.
pub struct LifecycleCoordinator {
    registry: Arc<RoomRegistry>,
    sessions: Arc<SessionTable>,
}

impl LifecycleCoordinator {
    /// Create a coordinator over shared state.
    pub fn new(registry: Arc<RoomRegistry>, sessions: Arc<SessionTable>) -> Self {
        Self { registry, sessions }
    }

    /// Register a new connection.
    pub async fn connect(&self, session: SessionId, sender: PeerSender) {
        self.sessions.connect(session, sender).await;
        debug!(%session, "Session connected");
    }

    /// Open a new room with `session` as host.
    ///
    /// A session already bound to another room leaves it once the new room
    /// is seated.
    #[instrument(skip(self))]
    pub async fn create_duel_room(&self, session: SessionId) -> Result<CreatedRoom, RoomError> {
        let previous = self.sessions.current_room(&session).await;

        let room_id = self.registry.create().await?;
        let room = self.registry.get(&room_id).await.ok_or(RoomError::RoomNotFound)?;

        let player_number = {
            let mut room = room.write().await;
            match self.seat(&mut room, session).await {
                Ok(n) => n,
                Err(e) => {
                    self.close_room(&mut room).await;
                    return Err(e);
                }
            }
        };

        if let Some(previous) = previous {
            self.abandon(session, previous).await;
        }

        info!(room = %room_id, host = %session, "Duel room created");

        Ok(CreatedRoom { room_id, player_number })
    }

    /// Seat `session` in the room named by `code`. Filling the last seat
    /// starts the duel and sends `duelStart` to every member.
    ///
    /// All checks run under the target room's lock; a refused join leaves
    /// any previous room untouched. A previous room is left only after the
    /// new seat is taken, so no two room locks are ever held at once.
    #[instrument(skip(self))]
    pub async fn join_duel_room(&self, session: SessionId, code: &str) -> Result<JoinedRoom, RoomError> {
        let room_id = RoomId::parse(code).ok_or(RoomError::RoomNotFound)?;
        let room = self.registry.get(&room_id).await.ok_or(RoomError::RoomNotFound)?;
        let previous = self.sessions.current_room(&session).await;

        let player_number = {
            let mut room = room.write().await;
            if room.is_retired() {
                return Err(RoomError::RoomNotFound);
            }
            if room.is_member(&session) {
                return Err(RoomError::AlreadyInRoom);
            }
            if room.player_count() >= MAX_PLAYERS {
                return Err(RoomError::RoomFull);
            }

            let player_number = match self.seat(&mut room, session).await {
                Ok(n) => n,
                Err(e) => {
                    // Seat cleared our binding; put the old one back
                    if let Some(previous) = previous {
                        self.sessions.bind_room(&session, previous).await;
                    }
                    return Err(e);
                }
            };

            if player_number == MAX_PLAYERS && room.status() == RoomStatus::Playing {
                let players = room.player_ids();
                let start = ServerMessage::DuelStart(DuelStartInfo {
                    players: players.clone(),
                    initial_sequence: room.sequence(),
                });
                self.sessions.send_to_all(&players, &start).await;
                info!(room = %room_id, "Duel started");
            } else {
                debug!(room = %room_id, %session, player_number, "Joined waiting room");
            }

            player_number
        };

        if let Some(previous) = previous.filter(|p| *p != room_id) {
            self.abandon(session, previous).await;
        }

        Ok(JoinedRoom { success: true, player_number })
    }

    /// Leave the current room explicitly. The room is removed and any
    /// remaining member gets `gameOver`. Returns false if the session was
    /// not in a live room.
    #[instrument(skip(self))]
    pub async fn leave_room(&self, session: SessionId) -> bool {
        match self.sessions.take_room(&session).await {
            Some(room_id) => self.abandon(session, room_id).await,
            None => false,
        }
    }

    /// Handle a dropped connection. Safe to call more than once.
    ///
    /// Mid-duel, the remaining member gets `duelEnd` and the room is
    /// removed. A waiting room is removed once empty.
    #[instrument(skip(self))]
    pub async fn disconnect(&self, session: SessionId) {
        let removed = match self.sessions.disconnect(&session).await {
            Some(s) => s,
            None => return,
        };

        let room_id = match removed.current_room {
            Some(id) => id,
            None => return,
        };

        let room = match self.registry.get(&room_id).await {
            Some(room) => room,
            None => return,
        };

        let mut room = room.write().await;
        if room.is_retired() {
            return;
        }

        room.remove_player(&session);

        match room.status() {
            RoomStatus::Playing => {
                let remaining = room.player_ids();
                self.close_room(&mut room).await;

                let end = ServerMessage::DuelEnd(EndInfo::new(REASON_OPPONENT_DISCONNECTED));
                self.sessions.send_to_all(&remaining, &end).await;

                info!(room = %room_id, %session, "Player disconnected mid-duel, room closed");
            }
            RoomStatus::Waiting => {
                if room.is_empty() {
                    self.close_room(&mut room).await;
                    info!(room = %room_id, "Waiting room abandoned, room closed");
                }
            }
        }
    }

    /// Close `room_id` on behalf of a departing member and send `gameOver`
    /// to whoever is left.
    async fn abandon(&self, session: SessionId, room_id: RoomId) -> bool {
        let room = match self.registry.get(&room_id).await {
            Some(room) => room,
            None => return false,
        };

        let mut room = room.write().await;
        if room.is_retired() {
            return false;
        }

        let remaining = room.others(&session);
        self.close_room(&mut room).await;

        let over = ServerMessage::GameOver(EndInfo::new(REASON_OPPONENT_LEFT));
        self.sessions.send_to_all(&remaining, &over).await;

        info!(room = %room_id, %session, "Player left, room closed");
        true
    }

    /// Bind then seat, so a failed seat leaves no binding behind.
    async fn seat(&self, room: &mut Room, session: SessionId) -> Result<usize, RoomError> {
        if !self.sessions.bind_room(&session, room.id).await {
            return Err(RoomError::NotConnected);
        }

        match room.add_player(session) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.sessions.unbind_room(&session, &room.id).await;
                Err(e)
            }
        }
    }

    /// Terminal transition: retire, drop from the registry, unbind members.
    async fn close_room(&self, room: &mut Room) {
        room.retire();
        self.registry.delete(&room.id).await;
        for player in room.players() {
            self.sessions.unbind_room(&player.session_id, &room.id).await;
        }
    }
}
