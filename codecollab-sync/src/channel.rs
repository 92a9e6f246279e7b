//! Channel lifecycle: one exclusive, single-use connection per session.
//!
//! A [`Channel`] wraps a [`Transport`] with the event-level surface a
//! session needs:
//! - `on` / `off`: handler registry keyed by [`EventKind`]; inbound
//!   messages of unregistered kinds are dropped before dispatch
//! - `emit`: encode and queue, fire-and-forget
//! - `disconnect`: tear down once; later calls are no-ops and later
//!   emits fail with [`ChannelError::Closed`]

use std::collections::HashSet;

use thiserror::Error;

use crate::protocol::{EventKind, ProtocolError, RoomMessage};
use crate::transport::Transport;

/// Channel and transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// Remote unreachable or I/O failure while connecting.
    #[error("connect error: {0}")]
    ConnectError(String),
    /// Remote refused the connection.
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    /// Established transport failed.
    #[error("transport error: {0}")]
    Transport(String),
    #[error("channel closed")]
    Closed,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl ChannelError {
    /// Whether this error came from establishing the connection.
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, Self::ConnectError(_) | Self::ConnectFailed(_))
    }
}

/// A registered-handler view over one transport.
pub struct Channel<T: Transport> {
    transport: T,
    handlers: HashSet<EventKind>,
    closed: bool,
}

impl<T: Transport> Channel<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            handlers: HashSet::new(),
            closed: false,
        }
    }

    /// Register interest in `kind`.
    pub fn on(&mut self, kind: EventKind) {
        if self.is_closed() {
            log::warn!("Ignoring handler registration for {} on closed channel", kind.name());
            return;
        }
        self.handlers.insert(kind);
    }

    /// Deregister `kind`. Returns whether a handler was registered.
    pub fn off(&mut self, kind: EventKind) -> bool {
        self.handlers.remove(&kind)
    }

    pub fn handles(&self, kind: EventKind) -> bool {
        self.handlers.contains(&kind)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Encode and queue `msg`.
    pub fn emit(&mut self, msg: &RoomMessage) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        let frame = msg.encode()?;
        log::debug!("emit {} ({} bytes)", msg.kind().name(), frame.len());
        self.transport.send(frame)
    }

    /// Next inbound message with a registered handler.
    ///
    /// Undecodable frames are logged and skipped. `None` once the channel
    /// or its transport is closed.
    pub async fn next_message(&mut self) -> Option<Result<RoomMessage, ChannelError>> {
        loop {
            if self.is_closed() {
                return None;
            }
            let frame = match self.transport.recv().await? {
                Ok(frame) => frame,
                Err(e) => return Some(Err(e)),
            };
            let msg = match RoomMessage::decode(&frame) {
                Ok(msg) => msg,
                Err(e) => {
                    log::warn!("Dropping undecodable frame ({} bytes): {e}", frame.len());
                    continue;
                }
            };
            if !self.handles(msg.kind()) {
                log::debug!("No handler for {}, dropping", msg.kind().name());
                continue;
            }
            return Some(Ok(msg));
        }
    }

    /// Close the transport and clear all handlers.
    ///
    /// Returns `true` only for the call that actually closed the channel.
    pub fn disconnect(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.handlers.clear();
        self.transport.close();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<T: Transport> Drop for Channel<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
