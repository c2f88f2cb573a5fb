use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use shared::domain::ConnectionId;

mod room;

pub use room::Room;

/// Handle on one room. Holding the lock makes the holder the room's single writer.
pub type RoomHandle = Arc<Mutex<Room>>;

#[derive(Default)]
struct RegistryInner {
    rooms: RwLock<HashMap<String, RoomHandle>>,
    members: RwLock<HashMap<ConnectionId, String>>,
}

/// Process-wide table of rooms plus an index from connection to the room it belongs to.
#[derive(Clone, Default)]
pub struct RoomRegistry {
    inner: Arc<RegistryInner>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the room did not exist before.
    pub async fn create_room(&self, name: &str) -> bool {
        let mut rooms = self.inner.rooms.write().await;
        if rooms.contains_key(name) {
            return false;
        }
        rooms.insert(name.to_string(), Arc::new(Mutex::new(Room::new(name))));
        debug!(room = name, "room created");
        true
    }

    pub async fn room(&self, name: &str) -> Option<RoomHandle> {
        self.inner.rooms.read().await.get(name).cloned()
    }

    pub async fn room_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.rooms.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn room_count(&self) -> usize {
        self.inner.rooms.read().await.len()
    }

    pub async fn find_room_by_member(&self, id: &ConnectionId) -> Option<String> {
        self.inner.members.read().await.get(id).cloned()
    }

    /// Records `id` as a member of `room`. Returns the room it was indexed under before, if any.
    pub async fn assign_member(&self, id: &ConnectionId, room: &str) -> Option<String> {
        self.inner
            .members
            .write()
            .await
            .insert(id.clone(), room.to_string())
    }

    /// Drops the index entry, but only while it still points at `room`.
    pub async fn release_member(&self, id: &ConnectionId, room: &str) -> bool {
        let mut members = self.inner.members.write().await;
        match members.get(id) {
            Some(current) if current == room => {
                members.remove(id);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
