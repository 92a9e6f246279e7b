//! # codecollab-sync — Room membership and code sync for collaborative editing
//!
//! Each participant runs a [`Session`] that joins a room through a central
//! coordinator, keeps a projection of who is present, and hands its current
//! document to members who join after it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌──────────────────┐
//! │ Session     │ ◄─────────────────► │ CoordinatorServer│
//! │ (per user)  │     Binary Proto    │ (central)        │
//! └──────┬──────┘                     └────────┬─────────┘
//!        │                                     │
//!        ▼                                     ▼
//! ┌─────────────┐                     ┌──────────────────┐
//! │ Projection  │                     │ Coordinator      │
//! │ + Document  │                     │ (authority)      │
//! └──────┬──────┘                     └──────────────────┘
//!        │ SessionEvent
//!        ▼
//!  rendering layer
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — Binary wire protocol (bincode-encoded RoomMessage)
//! - [`room`] — Participants and the local membership projection
//! - [`document`] — Local document mirror
//! - [`transport`] — Transport/Connector seams, WebSocket and in-memory
//! - [`channel`] — Handler registry, emit, one-shot disconnect
//! - [`retry`] — Reconnect policy for channel establishment
//! - [`notice`] — Events and toasts for the rendering layer
//! - [`session`] — Participant session state machine
//! - [`coordinator`] — Authoritative membership and routing
//! - [`server`] — WebSocket coordinator server

pub mod channel;
pub mod coordinator;
pub mod document;
pub mod notice;
pub mod protocol;
pub mod retry;
pub mod room;
pub mod server;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use channel::{Channel, ChannelError};
pub use coordinator::{
    serve_connection, Coordinator, CoordinatorStats, LocalConnector, DEFAULT_OUTBOX_CAPACITY,
};
pub use document::DocumentMirror;
pub use notice::{Notice, NoticeLevel, SessionEvent};
pub use protocol::{EventKind, ProtocolError, RoomMessage};
pub use retry::ReconnectPolicy;
pub use room::{ConnectionId, Participant, RoomProjection, RoomToken};
pub use server::{CoordinatorServer, ServerConfig};
pub use session::{
    Session, SessionConfig, SessionError, SessionHandle, SessionState, SyncPolicy,
    DEFAULT_EVENT_CAPACITY,
};
pub use transport::{
    Connector, MemoryTransport, Transport, WebSocketConnector, WebSocketTransport,
    DEFAULT_WRITE_QUEUE_CAPACITY,
};
