//! Standalone coordinator.
//!
//! `CODECOLLAB_BIND` sets the listen address, `RUST_LOG` the log level.

use codecollab_sync::{CoordinatorServer, ServerConfig};
use log::info;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();

    let config = ServerConfig::from_env();
    info!("Starting coordinator on {}...", config.bind_addr);

    CoordinatorServer::new(config).run().await
}
