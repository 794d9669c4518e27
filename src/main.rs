//! Music Quiz Server - Entry Point
//!
//! Loads configuration and playlists, starts the GameServer actor and
//! accepts WebSocket connections.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use music_quiz_server::{
    handle_connection, GameServer, JsonPlaylistStore, PlaylistTrackResolver, ServerConfig,
};

/// Channel buffer size for server commands
const CHANNEL_BUFFER_SIZE: usize = 256;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=music_quiz_server=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("music_quiz_server=info")),
        )
        .init();

    let config = ServerConfig::from_env();

    let playlists = JsonPlaylistStore::load_or_empty(&config.playlist_file);

    let listener = TcpListener::bind(&config.addr).await?;
    info!("Music Quiz Server listening on {}", config.addr);

    let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    let server = GameServer::new(
        cmd_rx,
        Arc::new(playlists),
        Arc::new(PlaylistTrackResolver),
        config,
    );
    tokio::spawn(server.run());

    info!("GameServer actor started");

    // Connection accept loop
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New connection from {}", addr);
                let cmd_tx = cmd_tx.clone();

                tokio::spawn(async move {
                    match handle_connection(stream, cmd_tx).await {
                        Err(e) if e.is_fatal() => error!("Connection handler error: {}", e),
                        Err(e) => warn!("Connection closed with error: {}", e),
                        Ok(()) => {}
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
