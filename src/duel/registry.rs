//! Room Registry
//!
//! Sole owner of every live room. Each room sits behind its own lock so a
//! handler can hold one room for a whole check-mutate-broadcast sequence
//! without blocking unrelated rooms.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::duel::room::{Room, RoomId};
use crate::duel::RoomError;

/// Shared handle to a room.
pub type SharedRoom = Arc<RwLock<Room>>;

/// Manages all live rooms.
pub struct RoomRegistry {
    rooms: RwLock<BTreeMap<RoomId, SharedRoom>>,
}

impl RoomRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create an empty waiting room under a fresh identifier.
    pub async fn create(&self) -> Result<RoomId, RoomError> {
        self.insert(RoomId::new_random()).await
    }

    async fn insert(&self, id: RoomId) -> Result<RoomId, RoomError> {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(&id) {
            return Err(RoomError::IdCollision(id));
        }
        rooms.insert(id, Arc::new(RwLock::new(Room::new(id))));
        Ok(id)
    }

    /// Look up a room.
    pub async fn get(&self, id: &RoomId) -> Option<SharedRoom> {
        self.rooms.read().await.get(id).cloned()
    }

    /// Remove a room. Idempotent; returns whether a room was removed.
    ///
    /// Callers that already hold the room's lock should retire it through
    /// the guard; this only drops the registry's handle.
    pub async fn delete(&self, id: &RoomId) -> bool {
        self.rooms.write().await.remove(id).is_some()
    }

    /// Whether a room is registered.
    pub async fn contains(&self, id: &RoomId) -> bool {
        self.rooms.read().await.contains_key(id)
    }

    /// Number of live rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
