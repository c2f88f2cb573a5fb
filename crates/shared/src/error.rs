use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::EventName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    MalformedPayload,
    CapabilityViolation,
    UnknownRoom,
    NotAMember,
    ConnectionLost,
}

impl ErrorCode {
    /// Only structural failures are reported back to the client; everything else stays quiet.
    pub fn is_reported(&self) -> bool {
        matches!(self, Self::MalformedPayload)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code:?}: {message}")]
pub struct CoreError {
    pub code: ErrorCode,
    pub message: String,
}

impl CoreError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn malformed(event: EventName) -> Self {
        Self::new(ErrorCode::MalformedPayload, event.as_str())
    }

    pub fn capability(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CapabilityViolation, message)
    }

    pub fn unknown_room(room_name: &str) -> Self {
        Self::new(ErrorCode::UnknownRoom, format!("room `{room_name}` does not exist"))
    }

    pub fn not_a_member(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotAMember, message)
    }
}
