//! Event Relay
//!
//! Forwards gameplay messages from a sender to every other member of its
//! room. Duel and turn events share the room's sequence counter, so the
//! stamped `sequence` values form one gap-free order per room.
//!
//! Messages that fail a check are dropped without telling the sender; the
//! returned [`RelayOutcome`] exists for logging and tests only.

use std::sync::Arc;
use serde_json::Value;
use tracing::trace;

use crate::duel::registry::RoomRegistry;
use crate::duel::room::RoomStatus;
use crate::duel::session::{SessionId, SessionTable};
use crate::network::protocol::{SenderRole, ServerMessage};

/// Kinds of relayed gameplay message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayKind {
    /// `duelEvent`
    DuelEvent,
    /// `turnOver`
    TurnOver,
    /// `initDeck`, delivered as `syncInitDeck`
    InitDeck,
    /// `battleMessage`
    BattleMessage,
}

impl RelayKind {
    /// Event name, for logs.
    pub fn name(self) -> &'static str {
        match self {
            RelayKind::DuelEvent => "duelEvent",
            RelayKind::TurnOver => "turnOver",
            RelayKind::InitDeck => "initDeck",
            RelayKind::BattleMessage => "battleMessage",
        }
    }

    /// Only relayed once the room is `Playing`. Chat is relayed in any state.
    pub fn requires_playing(self) -> bool {
        !matches!(self, RelayKind::BattleMessage)
    }

    /// Stamped with the room's next sequence number.
    pub fn is_sequenced(self) -> bool {
        matches!(self, RelayKind::DuelEvent | RelayKind::TurnOver)
    }

    /// Sender must hold a seat, not just a room binding.
    pub fn requires_seat(self) -> bool {
        matches!(self, RelayKind::DuelEvent)
    }

    /// Payload gets fields added and must be a JSON object.
    fn is_annotated(self) -> bool {
        !matches!(self, RelayKind::InitDeck)
    }

    fn into_message(self, payload: Value) -> ServerMessage {
        match self {
            RelayKind::DuelEvent => ServerMessage::DuelEvent(payload),
            RelayKind::TurnOver => ServerMessage::TurnOver(payload),
            RelayKind::InitDeck => ServerMessage::SyncInitDeck(payload),
            RelayKind::BattleMessage => ServerMessage::BattleMessage(payload),
        }
    }
}

/// Why a message was not relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Sender is not bound to a room.
    NotInRoom,
    /// Sender's room no longer exists.
    RoomGone,
    /// Room is still waiting for its second player.
    NotPlaying,
    /// Sender is bound to the room but holds no seat.
    NotMember,
    /// Payload must be a JSON object.
    NotAnObject,
}

/// Result of a relay attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Queued to `recipients` peers.
    Forwarded {
        /// Peers the message was queued for.
        recipients: usize,
        /// Stamped sequence number, for sequenced kinds.
        sequence: Option<u64>,
    },
    /// Silently dropped.
    Dropped(DropReason),
}

/// Gameplay message forwarder.
pub struct EventRelay {
    registry: Arc<RoomRegistry>,
    sessions: Arc<SessionTable>,
}

impl EventRelay {
    /// Create a relay over shared state.
    pub fn new(registry: Arc<RoomRegistry>, sessions: Arc<SessionTable>) -> Self {
        Self { registry, sessions }
    }

    /// Relay `payload` from `from` to the rest of its room.
    pub async fn relay(&self, from: SessionId, kind: RelayKind, mut payload: Value) -> RelayOutcome {
        let room_id = match self.sessions.current_room(&from).await {
            Some(id) => id,
            None => return RelayOutcome::Dropped(DropReason::NotInRoom),
        };

        let room = match self.registry.get(&room_id).await {
            Some(room) => room,
            None => return RelayOutcome::Dropped(DropReason::RoomGone),
        };

        // Held until the message is queued so recipients see sequence order.
        let mut room = room.write().await;

        if room.is_retired() {
            return RelayOutcome::Dropped(DropReason::RoomGone);
        }

        if kind.requires_playing() && room.status() != RoomStatus::Playing {
            return RelayOutcome::Dropped(DropReason::NotPlaying);
        }

        if kind.requires_seat() && !room.is_member(&from) {
            return RelayOutcome::Dropped(DropReason::NotMember);
        }

        if kind.is_annotated() && !payload.is_object() {
            return RelayOutcome::Dropped(DropReason::NotAnObject);
        }

        let sequence = if kind.is_sequenced() {
            Some(room.next_sequence())
        } else {
            None
        };

        if let Value::Object(fields) = &mut payload {
            if let Some(seq) = sequence {
                fields.insert("sequence".to_string(), Value::from(seq));
            }
            if kind == RelayKind::BattleMessage {
                let is_host = room.player(&from).map(|p| p.is_host).unwrap_or(false);
                let role = SenderRole::from_host_flag(is_host);
                fields.insert("sender".to_string(), Value::from(role.as_str()));
                fields.insert("isOpponent".to_string(), Value::Bool(true));
            }
        }

        let recipients = room.others(&from);
        let message = kind.into_message(payload);
        let delivered = self.sessions.send_to_all(&recipients, &message).await;

        trace!(room = %room.id, kind = kind.name(), ?sequence, delivered, "Relayed");

        RelayOutcome::Forwarded {
            recipients: delivered,
            sequence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duel::lifecycle::LifecycleCoordinator;
    use proptest::prelude::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Harness {
        registry: Arc<RoomRegistry>,
        sessions: Arc<SessionTable>,
        lifecycle: LifecycleCoordinator,
        relay: EventRelay,
    }

    impl Harness {
        fn new() -> Self {
            let registry = Arc::new(RoomRegistry::new());
            let sessions = Arc::new(SessionTable::new());
            Self {
                lifecycle: LifecycleCoordinator::new(registry.clone(), sessions.clone()),
                relay: EventRelay::new(registry.clone(), sessions.clone()),
                registry,
                sessions,
            }
        }

        async fn connect(&self) -> (SessionId, mpsc::Receiver<ServerMessage>) {
            let id = SessionId::new_random();
            let (tx, rx) = mpsc::channel(64);
            self.lifecycle.connect(id, tx).await;
            (id, rx)
        }

        /// Host and guest in a playing room, with the duelStart messages drained.
        async fn playing_pair(
            &self,
        ) -> (SessionId, mpsc::Receiver<ServerMessage>, SessionId, mpsc::Receiver<ServerMessage>) {
            let (a, mut rx_a) = self.connect().await;
            let (b, mut rx_b) = self.connect().await;
            let created = self.lifecycle.create_duel_room(a).await.unwrap();
            self.lifecycle.join_duel_room(b, &created.room_id.to_string()).await.unwrap();
            assert!(matches!(rx_a.try_recv(), Ok(ServerMessage::DuelStart(_))));
            assert!(matches!(rx_b.try_recv(), Ok(ServerMessage::DuelStart(_))));
            (a, rx_a, b, rx_b)
        }
    }

    #[tokio::test]
    async fn test_duel_event_stamped_and_forwarded_to_opponent() {
        let h = Harness::new();
        let (a, mut rx_a, _b, mut rx_b) = h.playing_pair().await;

        let outcome = h.relay.relay(a, RelayKind::DuelEvent, json!({"move": "draw"})).await;
        assert_eq!(outcome, RelayOutcome::Forwarded { recipients: 1, sequence: Some(1) });

        match rx_b.try_recv() {
            Ok(ServerMessage::DuelEvent(payload)) => {
                assert_eq!(payload, json!({"move": "draw", "sequence": 1}));
            }
            other => panic!("expected duelEvent, got {other:?}"),
        }
        // Sender gets nothing back
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_duel_and_turn_share_counter() {
        let h = Harness::new();
        let (a, _rx_a, b, mut rx_b) = h.playing_pair().await;

        h.relay.relay(a, RelayKind::DuelEvent, json!({})).await;
        let outcome = h.relay.relay(b, RelayKind::TurnOver, json!({"cards": []})).await;
        assert_eq!(outcome, RelayOutcome::Forwarded { recipients: 1, sequence: Some(2) });
        let outcome = h.relay.relay(a, RelayKind::TurnOver, json!({"cards": [1]})).await;
        assert_eq!(outcome, RelayOutcome::Forwarded { recipients: 1, sequence: Some(3) });

        match rx_b.try_recv() {
            Ok(ServerMessage::DuelEvent(p)) => assert_eq!(p["sequence"], 1),
            other => panic!("expected duelEvent, got {other:?}"),
        }
        match rx_b.try_recv() {
            Ok(ServerMessage::TurnOver(p)) => {
                assert_eq!(p["sequence"], 3);
                assert_eq!(p["cards"], json!([1]));
            }
            other => panic!("expected turnOver, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_status_gated_kinds_dropped_while_waiting() {
        let h = Harness::new();
        let (a, _rx_a) = h.connect().await;
        h.lifecycle.create_duel_room(a).await.unwrap();

        for kind in [RelayKind::DuelEvent, RelayKind::TurnOver, RelayKind::InitDeck] {
            let outcome = h.relay.relay(a, kind, json!({})).await;
            assert_eq!(outcome, RelayOutcome::Dropped(DropReason::NotPlaying));
        }

        // Dropped messages consume no sequence numbers
        let room_id = h.sessions.current_room(&a).await.unwrap();
        let room = h.registry.get(&room_id).await.unwrap();
        assert_eq!(room.read().await.sequence(), 0);
    }

    #[tokio::test]
    async fn test_battle_message_relayed_while_waiting() {
        let h = Harness::new();
        let (a, mut rx_a) = h.connect().await;
        h.lifecycle.create_duel_room(a).await.unwrap();

        // Nobody to receive it yet, but it passes the gate
        let outcome = h.relay.relay(a, RelayKind::BattleMessage, json!({"text": "hi"})).await;
        assert_eq!(outcome, RelayOutcome::Forwarded { recipients: 0, sequence: None });
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_battle_message_labels_sender() {
        let h = Harness::new();
        let (a, mut rx_a, b, mut rx_b) = h.playing_pair().await;

        h.relay.relay(a, RelayKind::BattleMessage, json!({"text": "gl"})).await;
        match rx_b.try_recv() {
            Ok(ServerMessage::BattleMessage(p)) => {
                assert_eq!(p["text"], "gl");
                assert_eq!(p["sender"], "host");
                assert_eq!(p["isOpponent"], true);
                assert!(p.get("sequence").is_none());
            }
            other => panic!("expected battleMessage, got {other:?}"),
        }

        h.relay.relay(b, RelayKind::BattleMessage, json!({"text": "hf"})).await;
        match rx_a.try_recv() {
            Ok(ServerMessage::BattleMessage(p)) => assert_eq!(p["sender"], "guest"),
            other => panic!("expected battleMessage, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_init_deck_relayed_verbatim() {
        let h = Harness::new();
        let (a, _rx_a, _b, mut rx_b) = h.playing_pair().await;
        let deck = json!([{"name": "Dragon", "id": 1}, {"name": "Knight", "id": 2}]);

        let outcome = h.relay.relay(a, RelayKind::InitDeck, deck.clone()).await;
        assert_eq!(outcome, RelayOutcome::Forwarded { recipients: 1, sequence: None });
        match rx_b.try_recv() {
            Ok(ServerMessage::SyncInitDeck(p)) => assert_eq!(p, deck),
            other => panic!("expected syncInitDeck, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unbound_sender_dropped() {
        let h = Harness::new();
        let (a, _rx_a) = h.connect().await;
        let outcome = h.relay.relay(a, RelayKind::BattleMessage, json!({})).await;
        assert_eq!(outcome, RelayOutcome::Dropped(DropReason::NotInRoom));
    }

    #[tokio::test]
    async fn test_stale_binding_dropped_for_duel_event() {
        let h = Harness::new();
        let (a, _rx_a, _b, _rx_b) = h.playing_pair().await;
        let (c, _rx_c) = h.connect().await;

        // Bind an outsider to the room without seating it
        let room_id = h.sessions.current_room(&a).await.unwrap();
        h.sessions.bind_room(&c, room_id).await;

        let outcome = h.relay.relay(c, RelayKind::DuelEvent, json!({})).await;
        assert_eq!(outcome, RelayOutcome::Dropped(DropReason::NotMember));

        // Turn events rely on the binding alone
        let outcome = h.relay.relay(c, RelayKind::TurnOver, json!({})).await;
        assert_eq!(outcome, RelayOutcome::Forwarded { recipients: 2, sequence: Some(1) });
    }

    #[tokio::test]
    async fn test_non_object_payload_dropped() {
        let h = Harness::new();
        let (a, _rx_a, _b, mut rx_b) = h.playing_pair().await;

        let outcome = h.relay.relay(a, RelayKind::DuelEvent, json!(42)).await;
        assert_eq!(outcome, RelayOutcome::Dropped(DropReason::NotAnObject));
        assert!(rx_b.try_recv().is_err());

        let outcome = h.relay.relay(a, RelayKind::DuelEvent, json!({})).await;
        assert_eq!(outcome, RelayOutcome::Forwarded { recipients: 1, sequence: Some(1) });
    }

    #[tokio::test]
    async fn test_room_gone_after_leave() {
        let h = Harness::new();
        let (a, _rx_a, b, _rx_b) = h.playing_pair().await;
        let room_id = h.sessions.current_room(&a).await.unwrap();

        h.lifecycle.leave_room(b).await;
        // Force a stale binding to the deleted room
        h.sessions.bind_room(&a, room_id).await;

        let outcome = h.relay.relay(a, RelayKind::DuelEvent, json!({})).await;
        assert_eq!(outcome, RelayOutcome::Dropped(DropReason::RoomGone));
    }

    #[tokio::test]
    async fn test_stalled_peer_does_not_wedge_room() {
        let h = Harness::new();
        let (a, _rx_a) = h.connect().await;
        let b = SessionId::new_random();
        let (tx_b, _rx_b) = tokio::sync::mpsc::channel(1);
        h.lifecycle.connect(b, tx_b).await;

        let created = h.lifecycle.create_duel_room(a).await.unwrap();
        h.lifecycle.join_duel_room(b, &created.room_id.to_string()).await.unwrap();

        // b's single slot holds duelStart and is never drained
        let limit = std::time::Duration::from_secs(1);
        for expected in 1..=3 {
            let outcome = tokio::time::timeout(limit, h.relay.relay(a, RelayKind::DuelEvent, json!({})))
                .await
                .expect("relay blocked on a stalled peer");
            assert_eq!(outcome, RelayOutcome::Forwarded { recipients: 0, sequence: Some(expected) });
        }

        tokio::time::timeout(limit, h.lifecycle.disconnect(a))
            .await
            .expect("disconnect blocked on a stalled peer");
        assert!(!h.registry.contains(&created.room_id).await);
        assert_eq!(h.sessions.current_room(&b).await, None);
    }

    proptest! {
        #[test]
        fn prop_sequence_gap_free(senders in proptest::collection::vec(any::<bool>(), 1..40)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let observed = rt.block_on(async {
                let h = Harness::new();
                let (a, mut rx_a, b, mut rx_b) = h.playing_pair().await;

                for (i, from_host) in senders.iter().enumerate() {
                    let from = if *from_host { a } else { b };
                    let kind = if i % 3 == 0 { RelayKind::TurnOver } else { RelayKind::DuelEvent };
                    h.relay.relay(from, kind, json!({"i": i})).await;
                }

                let mut observed = Vec::new();
                for rx in [&mut rx_a, &mut rx_b] {
                    let mut last = 0;
                    while let Ok(msg) = rx.try_recv() {
                        if let ServerMessage::DuelEvent(p) | ServerMessage::TurnOver(p) = msg {
                            let seq = p["sequence"].as_u64().unwrap();
                            assert!(seq > last, "per-recipient order must increase");
                            last = seq;
                            observed.push(seq);
                        }
                    }
                }
                observed.sort_unstable();
                observed
            });

            let expected: Vec<u64> = (1..=senders.len() as u64).collect();
            prop_assert_eq!(observed, expected);
        }
    }
}
