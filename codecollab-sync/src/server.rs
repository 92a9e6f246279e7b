//! WebSocket front for the [`Coordinator`].
//!
//! Architecture:
//! ```text
//! Session A ──ws──┐
//!                 ├── accept loop ── serve_connection ── Coordinator
//! Session B ──ws──┘   (one task per connection)
//! ```
//!
//! Every accepted socket is upgraded, wrapped in a [`WebSocketTransport`]
//! and handed to [`serve_connection`].

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use crate::coordinator::{serve_connection, Coordinator, CoordinatorStats, DEFAULT_OUTBOX_CAPACITY};
use crate::transport::WebSocketTransport;

/// Environment variable overriding [`ServerConfig::bind_addr`].
pub const BIND_ENV: &str = "CODECOLLAB_BIND";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Frames queued per connection before a stalled peer is evicted
    pub outbox_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Defaults, with `CODECOLLAB_BIND` applied if set.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(addr) = lookup(BIND_ENV).filter(|a| !a.trim().is_empty()) {
            config.bind_addr = addr;
        }
        config
    }
}

/// The coordinator server.
pub struct CoordinatorServer {
    config: ServerConfig,
    coordinator: Arc<Coordinator>,
}

impl CoordinatorServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            coordinator: Arc::new(Coordinator::with_outbox_capacity(config.outbox_capacity)),
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Start listening for WebSocket connections.
    ///
    /// Runs the accept loop until the listener fails.
    pub async fn run(&self) -> io::Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Coordinator listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let coordinator = Arc::clone(&self.coordinator);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(coordinator, stream, addr).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub async fn stats(&self) -> CoordinatorStats {
        self.coordinator.stats().await
    }
}

async fn handle_connection(
    coordinator: Arc<Coordinator>,
    stream: TcpStream,
    addr: SocketAddr,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    log::info!("WebSocket connection established from {addr}");

    serve_connection(coordinator, WebSocketTransport::new(ws_stream)).await;
    log::debug!("Connection from {addr} finished");
    Ok(())
}
