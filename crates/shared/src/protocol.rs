use std::{fmt, str::FromStr};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Cell, ConnectionId, Dimension, Member, Position, RoomStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventName {
    CreateRoom,
    JoinRoom,
    LeaveRoom,
    RoomJoined,
    RoomLeaved,
    GetRoomNames,
    RoomNamesUpdated,
    SetupClientEnv,
    AddLivingCells,
    RemoveLivingCells,
    LivingCellsUpdated,
    RequestSimulation,
    RequestSimulationUpdated,
    InvalidPayload,
}

impl EventName {
    pub const ALL: [EventName; 14] = [
        Self::CreateRoom,
        Self::JoinRoom,
        Self::LeaveRoom,
        Self::RoomJoined,
        Self::RoomLeaved,
        Self::GetRoomNames,
        Self::RoomNamesUpdated,
        Self::SetupClientEnv,
        Self::AddLivingCells,
        Self::RemoveLivingCells,
        Self::LivingCellsUpdated,
        Self::RequestSimulation,
        Self::RequestSimulationUpdated,
        Self::InvalidPayload,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateRoom => "create-room",
            Self::JoinRoom => "join-room",
            Self::LeaveRoom => "leave-room",
            Self::RoomJoined => "room-joined",
            Self::RoomLeaved => "room-leaved",
            Self::GetRoomNames => "get-room-names",
            Self::RoomNamesUpdated => "room-names-updated",
            Self::SetupClientEnv => "setup-client-env",
            Self::AddLivingCells => "add-living-cells",
            Self::RemoveLivingCells => "remove-living-cells",
            Self::LivingCellsUpdated => "living-cells-updated",
            Self::RequestSimulation => "request-simulation",
            Self::RequestSimulationUpdated => "request-simulation-updated",
            Self::InvalidPayload => "invalid-payload",
        }
    }

    /// Events a client is allowed to send to the server.
    pub fn is_client_request(&self) -> bool {
        matches!(
            self,
            Self::CreateRoom
                | Self::JoinRoom
                | Self::LeaveRoom
                | Self::GetRoomNames
                | Self::AddLivingCells
                | Self::RemoveLivingCells
                | Self::RequestSimulation
        )
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event name `{0}`")]
pub struct UnknownEventName(pub String);

impl FromStr for EventName {
    type Err = UnknownEventName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| UnknownEventName(s.to_string()))
    }
}

/// One frame on the wire: `{"event": "...", "payload": {...}}`.
///
/// The event is kept as a plain string so that frames with unknown names can still be
/// parsed, logged and dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(event: EventName, payload: Value) -> Self {
        Self {
            event: event.as_str().to_string(),
            payload,
        }
    }

    pub fn event_name(&self) -> Result<EventName, UnknownEventName> {
        self.event.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomNamePayload {
    pub room_name: String,
}

/// `leave-room` carries nothing required: the room is inferred from the connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRoomPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyPayload {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomJoinedPayload {
    pub room_name: String,
    pub new_user: Option<Member>,
    pub room_status: Option<RoomStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeavedUser {
    pub id: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomLeavedPayload {
    pub room_name: String,
    pub leaved_user: LeavedUser,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomNamesPayload {
    pub room_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupClientEnvPayload {
    pub dimension: Dimension,
}

/// Shared by `add-living-cells` and `remove-living-cells`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LivingCellsPayload {
    pub player_id: ConnectionId,
    pub room_name: String,
    pub position: Vec<Position>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LivingCellsUpdatedPayload {
    pub room_name: String,
    pub cells: Vec<Cell>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation_frame: Option<u64>,
}

/// Shared by `request-simulation` and `request-simulation-updated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSimulationPayload {
    pub player_id: ConnectionId,
    pub room_name: String,
    pub request_simulation: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidPayloadPayload {
    pub event_name: String,
}

/// Ties an event name to the payload type it carries.
pub trait Event: Send + Sync + 'static {
    const NAME: EventName;
    type Payload: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    /// Structural validation of an inbound payload.
    fn decode(payload: Value) -> Result<Self::Payload, serde_json::Error> {
        serde_json::from_value(payload)
    }
}

macro_rules! event {
    ($marker:ident, $name:ident, $payload:ty) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $marker;

        impl Event for $marker {
            const NAME: EventName = EventName::$name;
            type Payload = $payload;
        }
    };
}

/// Marker types binding each event name to its payload.
pub mod events {
    use super::*;

    event!(CreateRoom, CreateRoom, RoomNamePayload);
    event!(JoinRoom, JoinRoom, RoomNamePayload);
    event!(RoomJoined, RoomJoined, RoomJoinedPayload);
    event!(RoomLeaved, RoomLeaved, RoomLeavedPayload);
    event!(RoomNamesUpdated, RoomNamesUpdated, RoomNamesPayload);
    event!(SetupClientEnv, SetupClientEnv, SetupClientEnvPayload);
    event!(AddLivingCells, AddLivingCells, LivingCellsPayload);
    event!(RemoveLivingCells, RemoveLivingCells, LivingCellsPayload);
    event!(LivingCellsUpdated, LivingCellsUpdated, LivingCellsUpdatedPayload);
    event!(RequestSimulation, RequestSimulation, RequestSimulationPayload);
    event!(
        RequestSimulationUpdated,
        RequestSimulationUpdated,
        RequestSimulationPayload
    );
    event!(InvalidPayload, InvalidPayload, InvalidPayloadPayload);

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LeaveRoom;

    impl Event for LeaveRoom {
        const NAME: EventName = EventName::LeaveRoom;
        type Payload = LeaveRoomPayload;

        fn decode(payload: Value) -> Result<Self::Payload, serde_json::Error> {
            if payload.is_null() {
                return Ok(LeaveRoomPayload::default());
            }
            serde_json::from_value(payload)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GetRoomNames;

    impl Event for GetRoomNames {
        const NAME: EventName = EventName::GetRoomNames;
        type Payload = EmptyPayload;

        fn decode(payload: Value) -> Result<Self::Payload, serde_json::Error> {
            if payload.is_null() {
                return Ok(EmptyPayload::default());
            }
            serde_json::from_value(payload)
        }
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
