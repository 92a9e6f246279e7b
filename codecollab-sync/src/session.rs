//! Participant session: one member's view of a collaborative room.
//!
//! Provides:
//! - Channel lifecycle (open once, tear down once, reconnect policy)
//! - Membership reconciliation from JOINED / DISCONNECTED snapshots
//! - Code-sync handshake towards newly joined members
//! - Live edit relay
//!
//! ```text
//!  SessionHandle ──commands──┐
//!                            ▼
//!  Coordinator ──frames──► Session::run() ──SessionEvent──► rendering layer
//!       ▲                    │
//!       └──────── emits ─────┘
//! ```
//!
//! Everything that mutates the projection or the document mirror runs on
//! the task driving [`Session::run`]; nothing outside the session touches
//! that state.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::channel::{Channel, ChannelError};
use crate::document::DocumentMirror;
use crate::notice::{Notice, SessionEvent};
use crate::protocol::{EventKind, RoomMessage};
use crate::retry::ReconnectPolicy;
use crate::room::{ConnectionId, Participant, RoomProjection, RoomToken};
use crate::transport::{Connector, WebSocketConnector};

/// Default capacity of the bounded event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Which existing members answer a newcomer with the current document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPolicy {
    /// Every member holding a non-empty document answers; the newcomer
    /// keeps whichever copy arrives last.
    #[default]
    AllMembers,
    /// Only the longest-standing member (first in join order, newcomer
    /// excluded) answers.
    EarliestMember,
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Coordinator endpoint, e.g. `ws://127.0.0.1:5000`
    pub endpoint: String,
    pub room_token: RoomToken,
    /// Name chosen at entry; not unique, not validated
    pub display_name: String,
    pub reconnect: ReconnectPolicy,
    pub sync_policy: SyncPolicy,
    /// Relay local edits to the room as CODE_CHANGE
    pub relay_edits: bool,
    /// Capacity of the event channel (clamped to at least 1)
    pub event_capacity: usize,
}

impl SessionConfig {
    pub fn new(
        endpoint: impl Into<String>,
        room_token: impl Into<RoomToken>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            room_token: room_token.into(),
            display_name: display_name.into(),
            reconnect: ReconnectPolicy::default(),
            sync_policy: SyncPolicy::default(),
            relay_edits: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    #[must_use]
    pub fn with_sync_policy(mut self, sync_policy: SyncPolicy) -> Self {
        self.sync_policy = sync_policy;
        self
    }

    #[must_use]
    pub fn with_relay_edits(mut self, relay_edits: bool) -> Self {
        self.relay_edits = relay_edits;
        self
    }

    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    /// Waiting before retry `attempt` of channel establishment
    Reconnecting { attempt: u32 },
    /// JOIN sent, own JOINED not seen yet
    Joining,
    Joined,
    Failed,
    Closed,
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("session closed")]
    Closed,
}

enum SessionCommand {
    CodeChanged(String),
    Leave,
}

/// Cloneable handle feeding local input into a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    command_tx: mpsc::UnboundedSender<SessionCommand>,
}

impl std::fmt::Debug for SessionCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionCommand::CodeChanged(code) => write!(f, "CodeChanged({} bytes)", code.len()),
            SessionCommand::Leave => f.write_str("Leave"),
        }
    }
}

impl SessionHandle {
    /// Push a local edit into the session's document mirror.
    pub fn code_changed(&self, code: impl Into<String>) -> Result<(), SessionError> {
        self.command_tx
            .send(SessionCommand::CodeChanged(code.into()))
            .map_err(|_| SessionError::Closed)
    }

    /// Leave the room; the session tears down and `run` returns.
    pub fn leave(&self) -> Result<(), SessionError> {
        self.command_tx
            .send(SessionCommand::Leave)
            .map_err(|_| SessionError::Closed)
    }
}

/// One participant's session in one room.
pub struct Session<C: Connector> {
    config: SessionConfig,
    connector: C,
    /// Exclusive channel; `None` before open and after teardown
    channel: Option<Channel<C::Transport>>,
    opened: bool,
    state: SessionState,
    /// Learned from the first JOINED after our JOIN
    own_id: Option<ConnectionId>,
    room: RoomProjection,
    document: DocumentMirror,
    event_tx: mpsc::Sender<SessionEvent>,
    event_rx: Option<mpsc::Receiver<SessionEvent>>,
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    command_rx: mpsc::UnboundedReceiver<SessionCommand>,
}

impl Session<WebSocketConnector> {
    /// Session that connects over WebSocket.
    pub fn websocket(config: SessionConfig) -> Self {
        Self::new(config, WebSocketConnector)
    }
}

impl<C: Connector> Session<C> {
    pub fn new(config: SessionConfig, connector: C) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        Self {
            config,
            connector,
            channel: None,
            opened: false,
            state: SessionState::Idle,
            own_id: None,
            room: RoomProjection::new(),
            document: DocumentMirror::new(),
            event_tx,
            event_rx: Some(event_rx),
            command_tx,
            command_rx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.event_rx.take()
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            command_tx: self.command_tx.clone(),
        }
    }

    /// Establish the channel, register handlers and announce ourselves.
    ///
    /// Opens at most one channel per session: a second call while open is
    /// a no-op, a call after teardown or failure returns
    /// [`SessionError::Closed`]. On a connect failure the configured
    /// [`ReconnectPolicy`] decides whether to retry; once it gives up the
    /// session fails and tells the rendering layer to navigate away.
    pub async fn open(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Failed | SessionState::Closed => return Err(SessionError::Closed),
            _ if self.opened => {
                log::debug!("Session for room {} already open", self.config.room_token);
                return Ok(());
            }
            _ => {}
        }
        self.opened = true;
        self.state = SessionState::Connecting;

        let mut attempt = 0;
        let transport = loop {
            match self.connector.connect(&self.config.endpoint).await {
                Ok(transport) => break transport,
                Err(err) => match self.config.reconnect.delay_for(attempt) {
                    Some(delay) => {
                        attempt += 1;
                        log::warn!(
                            "Connect to {} failed ({err}); retry {attempt}/{} in {delay:?}",
                            self.config.endpoint,
                            self.config.reconnect.max_retries()
                        );
                        self.state = SessionState::Reconnecting { attempt };
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        self.fail(&err);
                        return Err(err.into());
                    }
                },
            }
        };

        // Handlers go in before JOIN so no early JOINED is missed.
        let mut channel = Channel::new(transport);
        for kind in EventKind::SESSION_INBOUND {
            channel.on(kind);
        }
        let join = RoomMessage::join(self.config.room_token.clone(), self.config.display_name.clone());
        let emitted = channel.emit(&join);
        self.channel = Some(channel);
        if let Err(err) = emitted {
            self.fail(&err);
            return Err(err.into());
        }

        self.state = SessionState::Joining;
        log::info!(
            "Joining room {} as {}",
            self.config.room_token,
            self.config.display_name
        );
        Ok(())
    }

    /// Drive the session until it closes, fails or is told to leave.
    ///
    /// Returns immediately if the session has no open channel.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        loop {
            let Some(channel) = self.channel.as_mut() else {
                return Ok(());
            };

            tokio::select! {
                inbound = channel.next_message() => match inbound {
                    Some(Ok(msg)) => self.handle_message(msg),
                    Some(Err(err)) => {
                        self.fail(&err);
                        return Err(err.into());
                    }
                    None => {
                        log::info!("Channel for room {} closed", self.config.room_token);
                        self.close();
                        self.publish(SessionEvent::Closed);
                        return Ok(());
                    }
                },
                Some(command) = self.command_rx.recv() => match command {
                    SessionCommand::CodeChanged(code) => self.update_code(code),
                    SessionCommand::Leave => {
                        self.close();
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Store a local edit; relay it to the room if configured.
    pub fn update_code(&mut self, code: impl Into<String>) {
        if !self.document.overwrite(code) {
            return;
        }
        if self.config.relay_edits {
            let msg = RoomMessage::code_change(self.document.as_str());
            self.emit(&msg);
        }
    }

    /// Tear down: deregister handlers and disconnect. Idempotent.
    ///
    /// No LEAVE is sent; the coordinator notices the closed channel.
    pub fn close(&mut self) {
        if self.teardown() {
            log::info!(
                "Left room {} ({})",
                self.config.room_token,
                self.config.display_name
            );
        }
        if self.state != SessionState::Failed {
            self.state = SessionState::Closed;
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn own_id(&self) -> Option<&ConnectionId> {
        self.own_id.as_ref()
    }

    pub fn members(&self) -> &[Participant] {
        self.room.members()
    }

    pub fn document(&self) -> &str {
        self.document.as_str()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    // ── Dispatch ────────────────────────────────────────────────────

    fn handle_message(&mut self, msg: RoomMessage) {
        if self.channel.is_none() {
            log::debug!("Dropping {} after teardown", msg.kind().name());
            return;
        }
        match msg {
            RoomMessage::Joined {
                members,
                joined_name,
                joined_id,
            } => self.on_joined(members, joined_name, joined_id),
            RoomMessage::Disconnected {
                connection_id,
                name,
            } => self.on_disconnected(connection_id, name),
            RoomMessage::SyncCode { code, target_id } => self.on_sync_code(code, target_id),
            RoomMessage::CodeChange { code } => self.on_code_change(code),
            RoomMessage::Join { .. } => log::debug!("Ignoring inbound join"),
        }
    }

    fn on_joined(&mut self, members: Vec<Participant>, joined_name: String, joined_id: ConnectionId) {
        // The first JOINED after our JOIN is our own admission.
        if self.own_id.is_none() {
            log::info!(
                "Joined room {} as {} ({joined_id})",
                self.config.room_token,
                self.config.display_name
            );
            self.own_id = Some(joined_id.clone());
            self.state = SessionState::Joined;
        }

        self.room.replace(members);
        self.publish(SessionEvent::MembersChanged(self.room.members().to_vec()));

        if joined_name != self.config.display_name {
            self.publish(SessionEvent::Notice(Notice::UserJoined { name: joined_name }));
        }

        if self.should_sync_to(&joined_id) {
            log::debug!(
                "Syncing {} bytes to {joined_id}",
                self.document.len()
            );
            let msg = RoomMessage::sync_code(self.document.as_str(), joined_id);
            self.emit(&msg);
        }
    }

    fn should_sync_to(&self, joined_id: &ConnectionId) -> bool {
        if self.document.is_empty() {
            return false;
        }
        let Some(own_id) = self.own_id.as_ref() else {
            return false;
        };
        if own_id == joined_id || !self.room.contains(joined_id) {
            return false;
        }
        match self.config.sync_policy {
            SyncPolicy::AllMembers => true,
            SyncPolicy::EarliestMember => self.room.earliest_member(joined_id) == Some(own_id),
        }
    }

    fn on_disconnected(&mut self, connection_id: ConnectionId, name: String) {
        self.publish(SessionEvent::Notice(Notice::UserLeft { name }));
        if self.room.remove(&connection_id).is_some() {
            self.publish(SessionEvent::MembersChanged(self.room.members().to_vec()));
        } else {
            log::debug!("Disconnected member {connection_id} was not in the projection");
        }
    }

    fn on_sync_code(&mut self, code: String, target_id: ConnectionId) {
        if let Some(own_id) = self.own_id.as_ref() {
            if own_id != &target_id {
                log::warn!("Dropping sync addressed to {target_id}, we are {own_id}");
                return;
            }
        }
        self.document.overwrite(code.as_str());
        self.publish(SessionEvent::DocumentSynced(code));
    }

    fn on_code_change(&mut self, code: String) {
        self.document.overwrite(code.as_str());
        self.publish(SessionEvent::RemoteEdit(code));
    }

    // ── Helpers ─────────────────────────────────────────────────────

    /// Fire-and-forget emit on the open channel.
    fn emit(&mut self, msg: &RoomMessage) {
        let Some(channel) = self.channel.as_mut() else {
            return;
        };
        if let Err(err) = channel.emit(msg) {
            log::warn!("Failed to emit {}: {err}", msg.kind().name());
        }
    }

    /// Never blocks the event loop: a full queue drops the event.
    fn publish(&self, event: SessionEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                log::warn!("Event queue full, dropping {event:?}");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                log::trace!("No event receiver");
            }
        }
    }

    fn fail(&mut self, err: &ChannelError) {
        if err.is_connect_failure() {
            log::error!(
                "Could not reach coordinator at {}: {err}",
                self.config.endpoint
            );
        } else {
            log::error!(
                "Session for room {} failed: {err}",
                self.config.room_token
            );
        }
        self.teardown();
        self.state = SessionState::Failed;
        self.publish(SessionEvent::Notice(Notice::ConnectionFailed {
            reason: err.to_string(),
        }));
        self.publish(SessionEvent::NavigateAway);
    }

    /// Returns `true` if a channel was actually torn down.
    fn teardown(&mut self) -> bool {
        let Some(mut channel) = self.channel.take() else {
            return false;
        };
        for kind in EventKind::SESSION_INBOUND {
            channel.off(kind);
        }
        if channel.handler_count() > 0 {
            log::debug!("{} handler(s) still registered at teardown", channel.handler_count());
        }
        channel.disconnect();
        true
    }
}

impl<C: Connector> Drop for Session<C> {
    fn drop(&mut self) {
        self.teardown();
    }
}
