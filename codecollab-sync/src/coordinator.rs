//! The coordinator: authoritative room membership and frame routing.
//!
//! ```text
//!  Session A ──┐                       ┌──► JOINED        → every member
//!              ├── serve_connection ───┼──► DISCONNECTED  → survivors
//!  Session B ──┘        │              ├──► SYNC_CODE     → target only
//!                       ▼              └──► CODE_CHANGE   → everyone else
//!                  Coordinator
//!        rooms: RoomToken → [Participant] (join order)
//!        peers: ConnectionId → outbox
//! ```
//!
//! Each connection gets a bounded outbox; routing never waits on a slow
//! peer. A peer whose outbox overflows is evicted and its room is told it
//! left. One encoded frame is shared between all recipients.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use crate::channel::ChannelError;
use crate::protocol::RoomMessage;
use crate::room::{ConnectionId, Participant, RoomToken};
use crate::transport::{Connector, MemoryTransport, Transport};

type Outbox = mpsc::Sender<Arc<Vec<u8>>>;

/// Default number of frames queued per connection before it is evicted.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

/// Coordinator statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub total_connections: u64,
    pub active_connections: usize,
    pub active_rooms: usize,
    /// Frames delivered to outboxes
    pub frames_routed: u64,
    /// Connections dropped for overflowing their outbox
    pub evicted_connections: u64,
}

struct Peer {
    outbox: Outbox,
    /// Room joined, with the name used there
    membership: Option<(RoomToken, String)>,
}

#[derive(Default)]
struct State {
    rooms: HashMap<RoomToken, Vec<Participant>>,
    peers: HashMap<ConnectionId, Peer>,
}

/// In-process room coordinator shared by all connection tasks.
pub struct Coordinator {
    state: RwLock<State>,
    outbox_capacity: usize,
    total_connections: AtomicU64,
    frames_routed: AtomicU64,
    evicted_connections: AtomicU64,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::with_outbox_capacity(DEFAULT_OUTBOX_CAPACITY)
    }
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Coordinator whose per-connection outboxes hold `capacity` frames
    /// (at least 1).
    pub fn with_outbox_capacity(capacity: usize) -> Self {
        Self {
            state: RwLock::new(State::default()),
            outbox_capacity: capacity.max(1),
            total_connections: AtomicU64::new(0),
            frames_routed: AtomicU64::new(0),
            evicted_connections: AtomicU64::new(0),
        }
    }

    /// Register a new connection. Frames routed to it arrive on the
    /// returned receiver, which ends if the connection is evicted.
    pub async fn register(&self) -> (ConnectionId, mpsc::Receiver<Arc<Vec<u8>>>) {
        let id = ConnectionId::generate();
        let (outbox, rx) = mpsc::channel(self.outbox_capacity);
        self.state.write().await.peers.insert(
            id.clone(),
            Peer {
                outbox,
                membership: None,
            },
        );
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        log::debug!("Registered connection {id}");
        (id, rx)
    }

    /// Decode one inbound frame from `from` and route it.
    pub async fn handle_frame(&self, from: &ConnectionId, frame: &[u8]) {
        let msg = match RoomMessage::decode(frame) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("Dropping undecodable frame from {from}: {e}");
                return;
            }
        };
        match msg {
            RoomMessage::Join {
                room_token,
                display_name,
            } => self.join(from, room_token, display_name).await,
            RoomMessage::SyncCode { target_id, .. } => {
                self.route_sync(from, &target_id, Arc::new(frame.to_vec())).await
            }
            RoomMessage::CodeChange { .. } => {
                self.relay_to_others(from, Arc::new(frame.to_vec())).await
            }
            other => log::warn!(
                "Ignoring {} sent by connection {from}",
                other.kind().name()
            ),
        }
    }

    /// Admit `id` to `room` and broadcast the new snapshot to every member,
    /// the newcomer included.
    pub async fn join(&self, id: &ConnectionId, room: RoomToken, display_name: String) {
        let mut state = self.state.write().await;
        let Some(peer) = state.peers.get_mut(id) else {
            log::warn!("Join from unregistered connection {id}");
            return;
        };
        let previous = peer.membership.replace((room.clone(), display_name.clone()));
        if let Some((old_room, _)) = previous {
            let lagging = self.leave_room(&mut state, id, &old_room);
            self.evict(&mut state, lagging);
        }

        let newcomer = Participant::new(id.clone(), display_name);
        let members = state.rooms.entry(room.clone()).or_default();
        members.push(newcomer.clone());
        let snapshot = members.clone();
        log::info!(
            "{} ({id}) joined room {room}, {} member(s)",
            newcomer.display_name,
            snapshot.len()
        );

        let Some(frame) = encode(&RoomMessage::joined(snapshot.clone(), &newcomer)) else {
            return;
        };
        let recipients = snapshot.iter().map(|p| &p.connection_id);
        let lagging = self.deliver(&state, recipients, &frame);
        self.evict(&mut state, lagging);
    }

    /// Forward a SYNC_CODE frame to `target`, if both share a room.
    async fn route_sync(&self, from: &ConnectionId, target: &ConnectionId, frame: Arc<Vec<u8>>) {
        let mut state = self.state.write().await;
        let sender_room = room_of(&state, from);
        if sender_room.is_none() || sender_room != room_of(&state, target) {
            log::warn!("Dropping sync from {from} to {target}: not in the same room");
            return;
        }
        log::debug!("Routing sync {from} -> {target}");
        let lagging = self.deliver(&state, [target], &frame);
        self.evict(&mut state, lagging);
    }

    /// Forward a frame to every other member of the sender's room.
    async fn relay_to_others(&self, from: &ConnectionId, frame: Arc<Vec<u8>>) {
        let mut state = self.state.write().await;
        let Some(room) = room_of(&state, from) else {
            log::warn!("Dropping edit from {from}: not in a room");
            return;
        };
        let Some(members) = state.rooms.get(room) else {
            return;
        };
        let recipients = members
            .iter()
            .map(|p| &p.connection_id)
            .filter(|id| *id != from);
        let lagging = self.deliver(&state, recipients, &frame);
        self.evict(&mut state, lagging);
    }

    /// Forget `id`; the rest of its room is told it left.
    pub async fn disconnect(&self, id: &ConnectionId) {
        let mut state = self.state.write().await;
        let Some(peer) = state.peers.remove(id) else {
            return;
        };
        if let Some((room, name)) = peer.membership {
            log::info!("{name} ({id}) left room {room}");
            let lagging = self.leave_room(&mut state, id, &room);
            self.evict(&mut state, lagging);
        } else {
            log::debug!("Connection {id} closed before joining");
        }
    }

    /// Remove `id` from `room`, notify the survivors, drop the room if empty.
    ///
    /// Returns the survivors whose outbox overflowed.
    #[must_use]
    fn leave_room(&self, state: &mut State, id: &ConnectionId, room: &RoomToken) -> Vec<ConnectionId> {
        let Some(members) = state.rooms.get_mut(room) else {
            return Vec::new();
        };
        let Some(idx) = members.iter().position(|p| &p.connection_id == id) else {
            return Vec::new();
        };
        let departed = members.remove(idx);

        if members.is_empty() {
            state.rooms.remove(room);
            log::info!("Room {room} removed (empty)");
            return Vec::new();
        }

        let survivors: Vec<ConnectionId> =
            members.iter().map(|p| p.connection_id.clone()).collect();
        match encode(&RoomMessage::disconnected(&departed)) {
            Some(frame) => self.deliver(state, survivors.iter(), &frame),
            None => Vec::new(),
        }
    }

    /// Queue `frame` for each recipient. Returns those whose outbox is full.
    #[must_use]
    fn deliver<'a>(
        &self,
        state: &State,
        recipients: impl IntoIterator<Item = &'a ConnectionId>,
        frame: &Arc<Vec<u8>>,
    ) -> Vec<ConnectionId> {
        let mut lagging = Vec::new();
        for id in recipients {
            let Some(peer) = state.peers.get(id) else {
                log::debug!("Connection {id} gone, frame not delivered");
                continue;
            };
            match peer.outbox.try_send(Arc::clone(frame)) {
                Ok(()) => {
                    self.frames_routed.fetch_add(1, Ordering::Relaxed);
                }
                Err(mpsc::error::TrySendError::Full(_)) => lagging.push(id.clone()),
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    log::debug!("Connection {id} closing, frame not delivered");
                }
            }
        }
        lagging
    }

    /// Drop connections that stopped draining their outbox.
    ///
    /// Dropping the outbox sender ends the connection's receiver, which
    /// closes its transport. Leaving its room can overflow further peers,
    /// which are evicted in turn.
    fn evict(&self, state: &mut State, mut lagging: Vec<ConnectionId>) {
        while let Some(id) = lagging.pop() {
            let Some(peer) = state.peers.remove(&id) else {
                continue;
            };
            self.evicted_connections.fetch_add(1, Ordering::Relaxed);
            log::warn!("Evicting connection {id}: outbox full");
            if let Some((room, _)) = peer.membership {
                lagging.extend(self.leave_room(state, &id, &room));
            }
        }
    }

    /// Current members of `room`, in join order.
    pub async fn members(&self, room: &RoomToken) -> Vec<Participant> {
        self.state
            .read()
            .await
            .rooms
            .get(room)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn room_count(&self) -> usize {
        self.state.read().await.rooms.len()
    }

    pub async fn stats(&self) -> CoordinatorStats {
        let state = self.state.read().await;
        CoordinatorStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: state.peers.len(),
            active_rooms: state.rooms.len(),
            frames_routed: self.frames_routed.load(Ordering::Relaxed),
            evicted_connections: self.evicted_connections.load(Ordering::Relaxed),
        }
    }
}

fn room_of<'a>(state: &'a State, id: &ConnectionId) -> Option<&'a RoomToken> {
    state
        .peers
        .get(id)
        .and_then(|p| p.membership.as_ref())
        .map(|(room, _)| room)
}

fn encode(msg: &RoomMessage) -> Option<Arc<Vec<u8>>> {
    match msg.encode() {
        Ok(frame) => Some(Arc::new(frame)),
        Err(e) => {
            log::error!("Failed to encode {}: {e}", msg.kind().name());
            None
        }
    }
}

/// Drive one connection until either side closes.
///
/// Inbound frames go to the coordinator; frames routed to this connection
/// go out on `transport`. The connection is unregistered on exit, which
/// tells its room it left.
pub async fn serve_connection<T: Transport>(coordinator: Arc<Coordinator>, mut transport: T) {
    let (id, mut outbox) = coordinator.register().await;

    loop {
        tokio::select! {
            inbound = transport.recv() => match inbound {
                Some(Ok(frame)) => coordinator.handle_frame(&id, &frame).await,
                Some(Err(e)) => {
                    log::warn!("Connection {id} failed: {e}");
                    break;
                }
                None => break,
            },
            outbound = outbox.recv() => match outbound {
                Some(frame) => {
                    if let Err(e) = transport.send(frame.to_vec()) {
                        log::warn!("Connection {id} cannot take more frames: {e}");
                        break;
                    }
                }
                None => {
                    log::info!("Connection {id} evicted, closing");
                    break;
                }
            },
        }
    }

    coordinator.disconnect(&id).await;
    transport.close();
}

/// [`Connector`] that attaches sessions to an in-process coordinator.
#[derive(Clone)]
pub struct LocalConnector {
    coordinator: Arc<Coordinator>,
}

impl LocalConnector {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }
}

impl Connector for LocalConnector {
    type Transport = MemoryTransport;

    async fn connect(&self, _endpoint: &str) -> Result<MemoryTransport, ChannelError> {
        let (client, server) = MemoryTransport::pair();
        tokio::spawn(serve_connection(Arc::clone(&self.coordinator), server));
        Ok(client)
    }
}
