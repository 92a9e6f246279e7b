//! Binary protocol for room membership and document sync.
//!
//! Every frame on the channel is one bincode-encoded [`RoomMessage`]:
//! ```text
//! ┌──────────────┬──────────────────────────────────────────┐
//! │ variant tag  │ fields (length-prefixed strings / lists) │
//! │ varint       │ variable                                 │
//! └──────────────┴──────────────────────────────────────────┘
//! ```
//!
//! | Event        | Direction                         |
//! |--------------|-----------------------------------|
//! | JOIN         | session → coordinator             |
//! | JOINED       | coordinator → every room member   |
//! | DISCONNECTED | coordinator → remaining members   |
//! | SYNC_CODE    | session → coordinator → one target|
//! | CODE_CHANGE  | session → coordinator → others    |

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::room::{ConnectionId, Participant, RoomToken};

/// Event kinds carried on the channel.
///
/// Used as handler-registry keys; the discriminants are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventKind {
    /// Request admission to a room
    Join = 1,
    /// Full membership snapshot plus who just joined
    Joined = 2,
    /// A member's channel closed
    Disconnected = 3,
    /// Current document text for one newly joined member
    SyncCode = 4,
    /// Live edit relayed to the rest of the room
    CodeChange = 5,
}

impl EventKind {
    /// Kinds a session dispatches once its channel is up.
    pub const SESSION_INBOUND: [EventKind; 4] = [
        EventKind::Joined,
        EventKind::Disconnected,
        EventKind::SyncCode,
        EventKind::CodeChange,
    ];

    /// Wire-style event name, as used in logs.
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Join => "join",
            EventKind::Joined => "joined",
            EventKind::Disconnected => "disconnected",
            EventKind::SyncCode => "sync-code",
            EventKind::CodeChange => "code-change",
        }
    }
}

/// Top-level protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomMessage {
    Join {
        room_token: RoomToken,
        display_name: String,
    },
    Joined {
        members: Vec<Participant>,
        joined_name: String,
        joined_id: ConnectionId,
    },
    Disconnected {
        connection_id: ConnectionId,
        name: String,
    },
    SyncCode {
        code: String,
        target_id: ConnectionId,
    },
    CodeChange {
        code: String,
    },
}

impl RoomMessage {
    pub fn join(room_token: RoomToken, display_name: impl Into<String>) -> Self {
        Self::Join {
            room_token,
            display_name: display_name.into(),
        }
    }

    pub fn joined(members: Vec<Participant>, newcomer: &Participant) -> Self {
        Self::Joined {
            members,
            joined_name: newcomer.display_name.clone(),
            joined_id: newcomer.connection_id.clone(),
        }
    }

    pub fn disconnected(participant: &Participant) -> Self {
        Self::Disconnected {
            connection_id: participant.connection_id.clone(),
            name: participant.display_name.clone(),
        }
    }

    pub fn sync_code(code: impl Into<String>, target_id: ConnectionId) -> Self {
        Self::SyncCode {
            code: code.into(),
            target_id,
        }
    }

    pub fn code_change(code: impl Into<String>) -> Self {
        Self::CodeChange { code: code.into() }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            RoomMessage::Join { .. } => EventKind::Join,
            RoomMessage::Joined { .. } => EventKind::Joined,
            RoomMessage::Disconnected { .. } => EventKind::Disconnected,
            RoomMessage::SyncCode { .. } => EventKind::SyncCode,
            RoomMessage::CodeChange { .. } => EventKind::CodeChange,
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(msg)
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
}
