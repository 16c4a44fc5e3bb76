//! Duel Relay Server
//!
//! Listens for duel clients and relays their events until Ctrl-C.

use std::sync::Arc;
use tracing::{info, error};
use tracing_subscriber::EnvFilter;

use duel_relay::{RelayServer, ServerConfig, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("duel_relay=info")),
        )
        .init();

    let config = ServerConfig::from_env();
    info!("Duel Relay Server v{}", VERSION);
    info!("Bind address: {}", config.bind_addr);
    info!("Max connections: {}", config.max_connections);

    let server = Arc::new(RelayServer::new(config));

    let signal_server = server.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                signal_server.shutdown();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    server.run().await?;

    // Give connection tasks a moment to notify their clients
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    Ok(())
}
