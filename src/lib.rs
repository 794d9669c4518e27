//! Multiplayer Music Quiz Server Library
//!
//! A WebSocket game server where players in a room hear the same clip and
//! race to name it. Built with tokio-tungstenite using the Actor pattern
//! for state management.
//!
//! # Features
//! - Rooms with 6-character codes, host promotion and settings
//! - Playlist-driven games with a per-round ready barrier
//! - Fuzzy answer matching with time and streak bonuses
//! - Automatic round end once everyone has answered
//! - Room chat and completed-game history
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `GameServer` is the central actor owning rooms, clients and the engine
//! - Each connection has a `handler` task communicating with the server
//! - `GameEngine` holds the game rules as plain functions over a `Room`
//! - No locks needed - all state access goes through message passing
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use tokio::sync::mpsc;
//! use music_quiz_server::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::default();
//!     let listener = TcpListener::bind(&config.addr).await.unwrap();
//!     let (cmd_tx, cmd_rx) = mpsc::channel(256);
//!     let playlists = Arc::new(JsonPlaylistStore::load_or_empty(&config.playlist_file));
//!
//!     tokio::spawn(GameServer::new(cmd_rx, playlists, Arc::new(PlaylistTrackResolver), config).run());
//!
//!     while let Ok((stream, _)) = listener.accept().await {
//!         let cmd_tx = cmd_tx.clone();
//!         tokio::spawn(handle_connection(stream, cmd_tx));
//!     }
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod game;
pub mod handler;
pub mod matcher;
pub mod message;
pub mod playlist;
pub mod registry;
pub mod resolver;
pub mod room;
pub mod scoring;
pub mod server;
pub mod track;
pub mod types;

// Re-export main types for convenience
pub use client::Client;
pub use config::ServerConfig;
pub use error::{AppError, SendError};
pub use game::{GameEngine, GameResult, GameState, RoundResult};
pub use handler::handle_connection;
pub use message::{ClientMessage, ErrorCode, ServerMessage};
pub use playlist::{JsonPlaylistStore, MemoryPlaylistStore, Playlist, PlaylistStore};
pub use registry::RoomRegistry;
pub use resolver::{PlaylistTrackResolver, TrackResolver};
pub use room::{Player, Room, RoomSettings};
pub use server::{GameServer, ServerCommand};
pub use track::Track;
pub use types::{PlayerId, RoomCode};
