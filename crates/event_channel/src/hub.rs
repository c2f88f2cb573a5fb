use std::{
    collections::HashMap,
    marker::PhantomData,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use serde_json::Value;
use shared::{domain::ConnectionId, protocol::Event};
use tracing::trace;

use crate::{connection::Connection, error::ChannelError};

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnectionId, Connection>,
    rooms: HashMap<String, Vec<ConnectionId>>,
}

/// Server-wide directory of live connections and the rooms they are joined to.
#[derive(Clone, Default)]
pub struct Hub {
    inner: Arc<RwLock<HubState>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HubState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HubState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, connection: Connection) {
        self.write()
            .connections
            .insert(connection.id().clone(), connection);
    }

    /// Forgets a connection and removes it from every room it had joined.
    pub fn unregister(&self, id: &ConnectionId) -> Option<Connection> {
        let mut state = self.write();
        state.rooms.retain(|_, members| {
            members.retain(|member| member != id);
            !members.is_empty()
        });
        state.connections.remove(id)
    }

    pub fn connection(&self, id: &ConnectionId) -> Option<Connection> {
        self.read().connections.get(id).cloned()
    }

    pub fn connection_count(&self) -> usize {
        self.read().connections.len()
    }

    pub fn join(&self, room: &str, id: &ConnectionId) {
        let mut state = self.write();
        let members = state.rooms.entry(room.to_string()).or_default();
        if !members.contains(id) {
            members.push(id.clone());
        }
    }

    pub fn leave(&self, room: &str, id: &ConnectionId) {
        let mut state = self.write();
        if let Some(members) = state.rooms.get_mut(room) {
            members.retain(|member| member != id);
            if members.is_empty() {
                state.rooms.remove(room);
            }
        }
    }

    pub fn members(&self, room: &str) -> Vec<ConnectionId> {
        self.read().rooms.get(room).cloned().unwrap_or_default()
    }

    /// Broadcast binding of `E` onto every connection currently joined to `room`.
    pub fn room<E: Event>(&self, room: &str) -> RoomBinding<E> {
        RoomBinding {
            hub: self.clone(),
            room: room.to_string(),
            _event: PhantomData,
        }
    }

    /// Sends `E` to every registered connection. Returns how many accepted it.
    pub fn broadcast<E: Event>(&self, payload: &E::Payload) -> Result<usize, ChannelError> {
        let value = encode::<E>(payload)?;
        let targets: Vec<Connection> = self.read().connections.values().cloned().collect();
        Ok(fan_out::<E>(&targets, &value))
    }

    fn room_connections(&self, room: &str, skip: Option<&ConnectionId>) -> Vec<Connection> {
        let state = self.read();
        state
            .rooms
            .get(room)
            .map(|members| {
                members
                    .iter()
                    .filter(|member| Some(*member) != skip)
                    .filter_map(|member| state.connections.get(member).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub struct RoomBinding<E: Event> {
    hub: Hub,
    room: String,
    _event: PhantomData<fn() -> E>,
}

impl<E: Event> RoomBinding<E> {
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Fans the payload out to every member. Returns how many connections accepted it.
    pub fn emit(&self, payload: &E::Payload) -> Result<usize, ChannelError> {
        let value = encode::<E>(payload)?;
        let targets = self.hub.room_connections(&self.room, None);
        Ok(fan_out::<E>(&targets, &value))
    }

    /// Same as [`RoomBinding::emit`] but skips one member.
    pub fn emit_except(
        &self,
        payload: &E::Payload,
        skip: &ConnectionId,
    ) -> Result<usize, ChannelError> {
        let value = encode::<E>(payload)?;
        let targets = self.hub.room_connections(&self.room, Some(skip));
        Ok(fan_out::<E>(&targets, &value))
    }
}

fn encode<E: Event>(payload: &E::Payload) -> Result<Value, ChannelError> {
    serde_json::to_value(payload).map_err(|source| ChannelError::Encode {
        event: E::NAME,
        source,
    })
}

fn fan_out<E: Event>(targets: &[Connection], value: &Value) -> usize {
    targets
        .iter()
        .filter(|connection| match connection.send(E::NAME, value.clone()) {
            Ok(()) => true,
            Err(err) => {
                trace!(connection = %connection.id(), event = %E::NAME, %err, "skipping member");
                false
            }
        })
        .count()
}
