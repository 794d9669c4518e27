//! Error types for the quiz server
//!
//! Defines application-level errors and message send errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Application-level errors
///
/// Covers fatal errors (connection termination), validation errors
/// (reported only to the client that issued the command) and integration
/// failures from the track metadata collaborator.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send error (fatal - internal channel broken)
    #[error("Channel send error")]
    ChannelSend,

    /// Room not found with the given code
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Player is already a member of the room
    #[error("Already joined")]
    AlreadyJoined,

    /// Room has reached its player limit
    #[error("Room is full")]
    RoomFull,

    /// Room membership or settings are frozen while a game runs
    #[error("Game in progress")]
    GameInProgress,

    /// Another player in the room uses this nickname
    #[error("Nickname taken: {0}")]
    NicknameTaken(String),

    /// Nickname is empty after trimming
    #[error("Invalid nickname")]
    InvalidNickname,

    /// Only the host may perform this action
    #[error("Not host")]
    NotHost,

    /// Client is not in any room
    #[error("Not in room")]
    NotInRoom,

    /// Client is already in a room
    #[error("Already in room")]
    AlreadyInRoom,

    #[error("Game already playing")]
    AlreadyPlaying,

    #[error("No players")]
    NoPlayers,

    #[error("Playlist not found: {0}")]
    PlaylistNotFound(String),

    #[error("Player not in room")]
    PlayerNotInRoom,

    #[error("Not waiting for ready")]
    NotWaitingForReady,

    #[error("Game not playing")]
    NotPlaying,

    #[error("No prepared track")]
    NoPreparedTrack,

    #[error("Players not ready")]
    PlayersNotReady,

    #[error("No active track")]
    NoActiveTrack,

    #[error("Already submitted")]
    AlreadySubmitted,

    #[error("No active round")]
    NoActiveRound,

    /// Tracks for the game are still being resolved
    #[error("Tracks not loaded")]
    NoTracksLoaded,

    /// No further round can be staged
    #[error("Round unavailable")]
    RoundUnavailable,

    /// Track metadata lookup failed (integration failure)
    #[error("Track load failed: {0}")]
    TrackLoad(String),
}

impl AppError {
    /// Fatal errors close the connection instead of being reported
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::WebSocket(_) | AppError::Io(_) | AppError::ChannelSend
        )
    }
}

/// Message send errors
///
/// Occurs when attempting to send messages through closed channels.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,
}
