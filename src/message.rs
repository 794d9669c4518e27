//! Message protocol definitions
//!
//! JSON-based bidirectional message protocol using Serde's tagged enum
//! for type-safe serialization/deserialization. Message types use the
//! kebab-case event names (`create-room`, `round-started`, ...), payload
//! fields use camelCase.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::game::{AnswerCheckResult, GameResult, RoundResult};
use crate::playlist::PlaylistSummary;
use crate::room::{Player, RoomSettings, RoomSnapshot, SettingsUpdate};
use crate::track::TrackView;
use crate::types::PlayerId;

/// Client → Server message
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Create a room and become its host
    CreateRoom {
        nickname: String,
        #[serde(default)]
        settings: Option<SettingsUpdate>,
    },
    /// Join an existing room by code
    JoinRoom { code: String, nickname: String },
    /// Leave the current room
    LeaveRoom { code: String },
    /// Change room settings (host only)
    UpdateSettings { code: String, settings: SettingsUpdate },
    /// Start a game (host only)
    StartGame { room_code: String },
    /// The staged track is loaded on this client
    PlayerReady { room_code: String },
    /// Guess for the live round
    SubmitAnswer { room_code: String, answer: String },
    /// Stage the next round or finish the game (host only)
    NextRound { room_code: String },
    /// Force the game to end (host only)
    GameEnd { room_code: String },
    /// Chat line to the room
    SendMessage { room_code: String, message: String },
    /// Available playlists
    ListPlaylists,
    /// Completed games
    GetHistory,
}

/// Server → Client message
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Connection successful, session id issued
    Connected { player_id: PlayerId },
    /// Generic acknowledgement of a command
    Ack { command: String },
    RoomCreated { room: RoomSnapshot },
    RoomJoined { room: RoomSnapshot },
    PlayerJoined { player: Player },
    PlayerLeft {
        player_id: PlayerId,
        nickname: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        new_host_id: Option<PlayerId>,
    },
    SettingsUpdated { settings: RoomSettings },
    GameStarted {
        total_rounds: u32,
        players: Vec<Player>,
    },
    /// Load this track and report ready
    PrepareRound {
        round_number: u32,
        track: TrackView,
        duration: u32,
    },
    PlayerReadyStatus {
        player_id: PlayerId,
        nickname: String,
        ready_count: usize,
        total_players: usize,
    },
    RoundStarted {
        round_number: u32,
        track: TrackView,
        duration: u32,
    },
    /// Verdict for the submitting player
    AnswerResult { result: AnswerCheckResult },
    /// Someone else answered
    AnswerSubmitted {
        player_id: PlayerId,
        nickname: String,
        has_answered: bool,
        is_correct: bool,
        timestamp: u64,
    },
    ScoreUpdated {
        scores: BTreeMap<PlayerId, u32>,
        streaks: BTreeMap<PlayerId, u32>,
    },
    RoundEnded { result: RoundResult },
    GameEnd {
        result: GameResult,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        forced: bool,
    },
    NewMessage {
        player_id: PlayerId,
        nickname: String,
        message: String,
        timestamp: u64,
    },
    Playlists { playlists: Vec<PlaylistSummary> },
    History { games: Vec<GameResult> },
    /// Error occurred
    Error { code: ErrorCode, message: String },
}

impl ServerMessage {
    pub fn ack(command: &str) -> Self {
        ServerMessage::Ack {
            command: command.to_string(),
        }
    }
}

/// Error codes for ServerMessage::Error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    RoomNotFound,
    AlreadyJoined,
    RoomFull,
    GameInProgress,
    NicknameTaken,
    InvalidNickname,
    NotHost,
    NotInRoom,
    AlreadyInRoom,
    AlreadyPlaying,
    NoPlayers,
    PlaylistNotFound,
    PlayerNotInRoom,
    NotWaitingForReady,
    NotPlaying,
    NoPreparedTrack,
    PlayersNotReady,
    NoActiveTrack,
    AlreadySubmitted,
    NoActiveRound,
    TracksLoading,
    RoundUnavailable,
    TrackLoadFailed,
    /// Invalid message format
    InvalidMessage,
    Internal,
}

/// Convert AppError to ServerMessage for client notification
impl From<AppError> for ServerMessage {
    fn from(err: AppError) -> Self {
        let (code, message) = match &err {
            AppError::RoomNotFound(code) => {
                (ErrorCode::RoomNotFound, format!("Room '{}' not found", code))
            }
            AppError::AlreadyJoined => (ErrorCode::AlreadyJoined, "You already joined this room".to_string()),
            AppError::RoomFull => (ErrorCode::RoomFull, "Room is full".to_string()),
            AppError::GameInProgress => (ErrorCode::GameInProgress, "A game is in progress".to_string()),
            AppError::NicknameTaken(name) => {
                (ErrorCode::NicknameTaken, format!("Nickname '{}' is already taken", name))
            }
            AppError::InvalidNickname => (ErrorCode::InvalidNickname, "Nickname must not be empty".to_string()),
            AppError::NotHost => (ErrorCode::NotHost, "Only the host can do that".to_string()),
            AppError::NotInRoom => (ErrorCode::NotInRoom, "You are not in a room".to_string()),
            AppError::AlreadyInRoom => (ErrorCode::AlreadyInRoom, "You are already in a room".to_string()),
            AppError::AlreadyPlaying => (ErrorCode::AlreadyPlaying, "A game is already running".to_string()),
            AppError::NoPlayers => (ErrorCode::NoPlayers, "At least one player is required".to_string()),
            AppError::PlaylistNotFound(id) => {
                (ErrorCode::PlaylistNotFound, format!("Playlist '{}' not found", id))
            }
            AppError::PlayerNotInRoom => (ErrorCode::PlayerNotInRoom, "Player is not in this room".to_string()),
            AppError::NotWaitingForReady => {
                (ErrorCode::NotWaitingForReady, "No round is waiting for players".to_string())
            }
            AppError::NotPlaying => (ErrorCode::NotPlaying, "No game is running".to_string()),
            AppError::NoPreparedTrack => (ErrorCode::NoPreparedTrack, "No round has been prepared".to_string()),
            AppError::PlayersNotReady => (ErrorCode::PlayersNotReady, "Not every player is ready".to_string()),
            AppError::NoActiveTrack => (ErrorCode::NoActiveTrack, "No track is playing".to_string()),
            AppError::AlreadySubmitted => {
                (ErrorCode::AlreadySubmitted, "You already answered this round".to_string())
            }
            AppError::NoActiveRound => (ErrorCode::NoActiveRound, "No round to end".to_string()),
            AppError::NoTracksLoaded => (ErrorCode::TracksLoading, "Tracks are still loading".to_string()),
            AppError::RoundUnavailable => (ErrorCode::RoundUnavailable, "Could not prepare the round".to_string()),
            AppError::TrackLoad(reason) => {
                (ErrorCode::TrackLoadFailed, format!("Failed to load tracks: {}", reason))
            }
            AppError::Json(e) => {
                (ErrorCode::InvalidMessage, format!("Invalid message format: {}", e))
            }
            // Fatal errors are not typically converted (connection closes)
            AppError::WebSocket(_) | AppError::Io(_) | AppError::ChannelSend => {
                (ErrorCode::Internal, "Internal error".to_string())
            }
        };
        ServerMessage::Error { code, message }
    }
}
