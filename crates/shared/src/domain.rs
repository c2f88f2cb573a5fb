use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one transport connection. Doubles as the player/guest id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i64,
    pub y: i64,
}

impl Position {
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    pub fn is_non_negative(&self) -> bool {
        self.x >= 0 && self.y >= 0
    }
}

impl From<(i64, i64)> for Position {
    fn from((x, y): (i64, i64)) -> Self {
        Self { x, y }
    }
}

pub const HUE_MAX: u16 = 360;
pub const SATURATION_MAX: u8 = 100;
pub const LIGHT_MIN: u8 = 30;
pub const LIGHT_MAX: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Hsl {
    pub hue: u16,
    pub saturation: u8,
    pub light: u8,
}

impl Hsl {
    pub const fn new(hue: u16, saturation: u8, light: u8) -> Self {
        Self {
            hue,
            saturation,
            light,
        }
    }

    /// True when every channel sits inside the range a generated player color may take.
    pub fn is_player_color(&self) -> bool {
        self.hue <= HUE_MAX
            && self.saturation <= SATURATION_MAX
            && (LIGHT_MIN..=LIGHT_MAX).contains(&self.light)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    pub position: Position,
    pub is_living: bool,
    pub appearance: Hsl,
}

impl Cell {
    pub fn living(position: Position, appearance: Hsl) -> Self {
        Self {
            position,
            is_living: true,
            appearance,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dimension {
    pub upper_left: Position,
    pub bottom_right: Position,
}

impl Dimension {
    pub fn contains(&self, position: Position) -> bool {
        position.x >= self.upper_left.x
            && position.y >= self.upper_left.y
            && position.x <= self.bottom_right.x
            && position.y <= self.bottom_right.y
    }
}

impl Default for Dimension {
    fn default() -> Self {
        Self {
            upper_left: Position::new(0, 0),
            bottom_right: Position::new(99, 99),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: ConnectionId,
    pub appearance: Hsl,
    pub request_start_simulation: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guest {
    pub id: ConnectionId,
}

/// A room member as it travels on the wire: players carry an appearance, guests only an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Member {
    Player(Player),
    Guest(Guest),
}

impl Member {
    pub fn id(&self) -> &ConnectionId {
        match self {
            Self::Player(player) => &player.id,
            Self::Guest(guest) => &guest.id,
        }
    }

    pub fn as_player(&self) -> Option<&Player> {
        match self {
            Self::Player(player) => Some(player),
            Self::Guest(_) => None,
        }
    }

    pub fn is_player(&self) -> bool {
        matches!(self, Self::Player(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomStatus {
    pub players: Vec<Player>,
    pub guests: Vec<Guest>,
}

impl RoomStatus {
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.players.iter().any(|player| &player.id == id)
            || self.guests.iter().any(|guest| &guest.id == id)
    }

    /// Folds a `room-joined` delta into a roster snapshot.
    pub fn insert(&mut self, member: Member) {
        if self.contains(member.id()) {
            return;
        }
        match member {
            Member::Player(player) => self.players.push(player),
            Member::Guest(guest) => self.guests.push(guest),
        }
    }

    pub fn remove(&mut self, id: &ConnectionId) {
        self.players.retain(|player| &player.id != id);
        self.guests.retain(|guest| &guest.id != id);
    }

    pub fn set_vote(&mut self, id: &ConnectionId, request_start_simulation: bool) {
        if let Some(player) = self.players.iter_mut().find(|player| &player.id == id) {
            player.request_start_simulation = request_start_simulation;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationState {
    Idle,
    WaitingForUnanimity,
    Running,
}
