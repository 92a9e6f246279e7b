//! Room membership as seen from one session.
//!
//! The coordinator holds the authoritative member list. Every session keeps
//! a [`RoomProjection`]: a local copy that is replaced wholesale by each
//! JOINED snapshot and trimmed by identifier on DISCONNECTED. A dropped or
//! reordered notification leaves the projection stale until the next
//! snapshot arrives.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of one live channel, assigned by the coordinator.
///
/// Unique while the channel is open, not stable across reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identifier (UUID v4 text).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Opaque room identifier shared out-of-band between participants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomToken(String);

impl RoomToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomToken {
    fn from(token: &str) -> Self {
        Self(token.to_owned())
    }
}

impl From<String> for RoomToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

/// One room member: connection identity plus the name chosen at entry.
///
/// Display names are neither unique nor validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub connection_id: ConnectionId,
    pub display_name: String,
}

impl Participant {
    pub fn new(connection_id: impl Into<ConnectionId>, display_name: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// A session's local, possibly stale, copy of a room's member list.
///
/// Order is the coordinator's order (join order), which the rendering
/// layer shows as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomProjection {
    members: Vec<Participant>,
}

impl RoomProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole member list with a coordinator snapshot.
    pub fn replace(&mut self, members: Vec<Participant>) {
        self.members = members;
    }

    /// Remove the member holding `connection_id`.
    ///
    /// Matching is by identifier only; two members sharing a display name
    /// are distinct entries.
    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<Participant> {
        let idx = self
            .members
            .iter()
            .position(|p| &p.connection_id == connection_id)?;
        Some(self.members.remove(idx))
    }

    pub fn members(&self) -> &[Participant] {
        &self.members
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.members.iter().any(|p| &p.connection_id == connection_id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Longest-standing member other than `excluding`.
    ///
    /// Members are in join order, so this is the first entry that is not
    /// `excluding`. It joined before everyone else still present, so any
    /// sync meant for it was already delivered.
    pub fn earliest_member(&self, excluding: &ConnectionId) -> Option<&ConnectionId> {
        self.members
            .iter()
            .map(|p| &p.connection_id)
            .find(|id| *id != excluding)
    }
}
