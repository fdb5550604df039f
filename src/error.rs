/// Error taxonomy shared by the codecs, sessions and the room controller
use std::time::Duration;

use crate::models::DeviceAddress;
use crate::protocol::OperatingMode;

pub type Result<T> = std::result::Result<T, HeaterError>;

#[derive(Debug, thiserror::Error)]
pub enum HeaterError {
    /// Bad input rejected before any device is contacted
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("room not found: {0}")]
    RoomNotFound(String),

    #[error("failed to connect to {address}: {reason}")]
    Connection {
        address: DeviceAddress,
        reason: String,
    },

    #[error("{operation} on {address} timed out after {after:?}")]
    Timeout {
        address: DeviceAddress,
        operation: &'static str,
        after: Duration,
    },

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("mode {0} is not supported by the active protocol profile")]
    UnsupportedMode(OperatingMode),

    #[error("characteristic {uuid} not found on {address}")]
    CharacteristicNotFound {
        address: DeviceAddress,
        uuid: uuid::Uuid,
    },

    #[error("transport error on {address}: {reason}")]
    Transport {
        address: DeviceAddress,
        reason: String,
    },

    #[error("bluetooth adapter error: {0}")]
    Adapter(String),

    #[error("session for {address} is {state}, expected {expected}")]
    InvalidState {
        address: DeviceAddress,
        state: &'static str,
        expected: &'static str,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl HeaterError {
    /// Transport-level failures poison the session that produced them
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            HeaterError::Connection { .. }
                | HeaterError::Timeout { .. }
                | HeaterError::Transport { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, HeaterError::Timeout { .. })
    }
}
