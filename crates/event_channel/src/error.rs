use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::protocol::EventName;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    /// An abort event arrived before the awaited one. Carries the abort payload.
    #[error("waiting for `{expected}` was aborted by `{event}`")]
    Aborted {
        expected: EventName,
        event: EventName,
        payload: Value,
    },
    #[error("connection closed")]
    Disconnected,
    #[error("failed to decode `{event}` payload: {source}")]
    Decode {
        event: EventName,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode `{event}` payload: {source}")]
    Encode {
        event: EventName,
        #[source]
        source: serde_json::Error,
    },
}

impl ChannelError {
    /// Decodes the payload of an [`ChannelError::Aborted`] rejection.
    pub fn abort_payload<T: DeserializeOwned>(&self) -> Option<T> {
        match self {
            Self::Aborted { payload, .. } => serde_json::from_value(payload.clone()).ok(),
            _ => None,
        }
    }

    pub fn is_aborted_by(&self, name: EventName) -> bool {
        matches!(self, Self::Aborted { event, .. } if *event == name)
    }
}
