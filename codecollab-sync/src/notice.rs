//! What a session tells the rendering layer.
//!
//! The rendering layer owns toasts, the member sidebar and navigation.
//! A session only publishes [`SessionEvent`]s; it never draws anything.

use std::fmt;

use crate::room::Participant;

/// How a notice should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
}

/// A transient user-facing notice (toast).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    UserJoined { name: String },
    UserLeft { name: String },
    ConnectionFailed { reason: String },
}

impl Notice {
    pub fn level(&self) -> NoticeLevel {
        match self {
            Notice::UserJoined { .. } | Notice::UserLeft { .. } => NoticeLevel::Success,
            Notice::ConnectionFailed { .. } => NoticeLevel::Error,
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::UserJoined { name } => write!(f, "{name} joined the room"),
            Notice::UserLeft { name } => write!(f, "{name} left the room"),
            // The reason goes to the log; users get the generic message.
            Notice::ConnectionFailed { .. } => {
                f.write_str("Socket connection failed, Try again later")
            }
        }
    }
}

/// Events emitted by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The member list to display, in coordinator order
    MembersChanged(Vec<Participant>),
    /// A toast to show
    Notice(Notice),
    /// Document text received from an existing member on join
    DocumentSynced(String),
    /// Document text relayed from another member's edit
    RemoteEdit(String),
    /// Fatal failure; leave the room view
    NavigateAway,
    /// The channel closed and the session has torn down
    Closed,
}
