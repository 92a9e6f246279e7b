//! Byte-frame transports beneath a [`Channel`](crate::channel::Channel).
//!
//! Two seams:
//! - [`Transport`]: an established duplex carrying whole binary frames.
//!   `send` never blocks; `recv` suspends until the next frame.
//! - [`Connector`]: establishes a transport to an endpoint.
//!
//! Implementations:
//! - [`WebSocketTransport`] / [`WebSocketConnector`] over tokio-tungstenite.
//!   Outgoing frames go through a bounded queue drained by a writer task,
//!   so emits are fire-and-forget; a full queue fails the send instead of
//!   growing without limit.
//! - [`MemoryTransport`]: an in-process pair, used by
//!   [`LocalConnector`](crate::coordinator::LocalConnector) and tests.

use std::future::Future;

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::channel::ChannelError;

/// Default number of outgoing frames a WebSocket writer may have queued.
pub const DEFAULT_WRITE_QUEUE_CAPACITY: usize = 1024;

/// An established, ordered, frame-oriented duplex.
pub trait Transport: Send + 'static {
    /// Queue one frame for delivery. No acknowledgment.
    fn send(&mut self, frame: Vec<u8>) -> Result<(), ChannelError>;

    /// Next inbound frame; `None` once the transport is closed.
    fn recv(&mut self) -> impl Future<Output = Option<Result<Vec<u8>, ChannelError>>> + Send;

    /// Close the transport. Safe to call more than once.
    fn close(&mut self);
}

/// Establishes transports to an endpoint.
pub trait Connector: Send + Sync {
    type Transport: Transport;

    /// Open a transport to `endpoint`.
    ///
    /// Fails with [`ChannelError::ConnectError`] when the remote is
    /// unreachable and [`ChannelError::ConnectFailed`] when it refuses.
    fn connect(
        &self,
        endpoint: &str,
    ) -> impl Future<Output = Result<Self::Transport, ChannelError>> + Send;
}

// ───────────────────────────────────────────────────────────────────
// WebSocket
// ───────────────────────────────────────────────────────────────────

/// Transport over a WebSocket stream (client or server side).
pub struct WebSocketTransport<S> {
    reader: SplitStream<WebSocketStream<S>>,
    /// Queue to the writer task; `None` once closed.
    outgoing: Option<mpsc::Sender<Message>>,
}

impl<S> WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap an upgraded stream. Spawns the writer task.
    pub fn new(stream: WebSocketStream<S>) -> Self {
        Self::with_queue_capacity(stream, DEFAULT_WRITE_QUEUE_CAPACITY)
    }

    /// Like [`new`](Self::new), with at most `capacity` frames waiting for
    /// the writer.
    pub fn with_queue_capacity(stream: WebSocketStream<S>, capacity: usize) -> Self {
        let (mut writer, reader) = stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(capacity.max(1));

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if writer.send(msg).await.is_err() || closing {
                    break;
                }
            }
            let _ = writer.close().await;
        });

        Self {
            reader,
            outgoing: Some(out_tx),
        }
    }
}

impl<S> Transport for WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn send(&mut self, frame: Vec<u8>) -> Result<(), ChannelError> {
        let tx = self.outgoing.as_ref().ok_or(ChannelError::Closed)?;
        tx.try_send(Message::Binary(frame.into()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    ChannelError::Transport("outgoing queue full".into())
                }
                mpsc::error::TrySendError::Closed(_) => ChannelError::Closed,
            })
    }

    async fn recv(&mut self) -> Option<Result<Vec<u8>, ChannelError>> {
        if self.outgoing.is_none() {
            return None;
        }
        while let Some(msg) = self.reader.next().await {
            match msg {
                Ok(Message::Binary(data)) => return Some(Ok(data.into())),
                Ok(Message::Close(_)) => return None,
                Ok(Message::Text(_)) => {
                    log::debug!("Ignoring text frame on binary channel");
                }
                Ok(_) => {}
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    return None;
                }
                Err(e) => return Some(Err(ChannelError::Transport(e.to_string()))),
            }
        }
        None
    }

    fn close(&mut self) {
        // A full queue skips the close frame; dropping the sender still
        // ends the writer, which closes the sink.
        if let Some(tx) = self.outgoing.take() {
            let _ = tx.try_send(Message::Close(None));
        }
    }
}

/// Connects to `ws://` / `wss://` endpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    type Transport = WebSocketTransport<MaybeTlsStream<TcpStream>>;

    async fn connect(&self, endpoint: &str) -> Result<Self::Transport, ChannelError> {
        match tokio_tungstenite::connect_async(endpoint).await {
            Ok((stream, _response)) => {
                log::debug!("WebSocket established to {endpoint}");
                Ok(WebSocketTransport::new(stream))
            }
            Err(e) => Err(classify_connect_error(e)),
        }
    }
}

/// Split handshake failures into unreachable vs refused.
fn classify_connect_error(err: tungstenite::Error) -> ChannelError {
    match err {
        tungstenite::Error::Io(e) => ChannelError::ConnectError(e.to_string()),
        tungstenite::Error::Http(response) => ChannelError::ConnectFailed(format!(
            "handshake rejected with status {}",
            response.status()
        )),
        other => ChannelError::ConnectFailed(other.to_string()),
    }
}

// ───────────────────────────────────────────────────────────────────
// In-memory
// ───────────────────────────────────────────────────────────────────

/// One end of an in-process transport pair.
pub struct MemoryTransport {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MemoryTransport {
    /// Two connected ends; frames sent on one arrive on the other in order.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Self { tx: Some(a_tx), rx: b_rx },
            Self { tx: Some(b_tx), rx: a_rx },
        )
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, frame: Vec<u8>) -> Result<(), ChannelError> {
        let tx = self.tx.as_ref().ok_or(ChannelError::Closed)?;
        tx.send(frame).map_err(|_| ChannelError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<Vec<u8>, ChannelError>> {
        if self.tx.is_none() {
            return None;
        }
        self.rx.recv().await.map(Ok)
    }

    fn close(&mut self) {
        self.tx = None;
        self.rx.close();
    }
}
