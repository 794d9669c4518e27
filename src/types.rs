//! Basic type definitions for the quiz server
//!
//! Provides newtype wrappers for type safety:
//! - `PlayerId`: UUID-based session identifier, doubles as the player id
//! - `RoomCode`: 6-character uppercase alphanumeric room code

use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Length of a generated room code
pub const ROOM_CODE_LEN: usize = 6;

const ROOM_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Unique player identifier (newtype pattern)
///
/// Issued once per WebSocket connection. A player's id is the id of the
/// connection that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    /// Create a new random player ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Room code (6-character uppercase alphanumeric)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(pub String);

impl RoomCode {
    /// Generate a new random room code
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let code: String = (0..ROOM_CODE_LEN)
            .map(|_| ROOM_CODE_CHARSET[rng.gen_range(0..ROOM_CODE_CHARSET.len())] as char)
            .collect();
        Self(code)
    }

    /// Create a RoomCode from user input (trimmed, converted to uppercase)
    pub fn from_string(code: String) -> Self {
        Self(code.trim().to_uppercase())
    }

    /// Check the fixed-length uppercase alphanumeric format
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == ROOM_CODE_LEN
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Milliseconds since the Unix epoch, for timestamps sent over the wire
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
