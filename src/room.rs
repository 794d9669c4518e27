//! Room aggregate
//!
//! A room owns its players (in join order), its settings and its single
//! `GameState`. The first player in join order is the successor when the
//! host leaves.

use std::time::Instant;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::game::GameState;
use crate::types::{unix_millis, PlayerId, RoomCode};

const AVATARS: [&str; 12] = [
    "😀", "😎", "🤓", "😺", "🐶", "🐻", "🦊", "🐼", "🐯", "🦁", "🐸", "🐙",
];

/// Pick a random avatar tag
pub fn random_avatar() -> String {
    AVATARS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(AVATARS[0])
        .to_string()
}

/// A member of a room
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    pub nickname: String,
    pub avatar: String,
    pub is_host: bool,
    /// Join time in Unix milliseconds
    pub joined_at: u64,
}

impl Player {
    pub fn new(id: PlayerId, nickname: String, is_host: bool) -> Self {
        Self {
            id,
            nickname,
            avatar: random_avatar(),
            is_host,
            joined_at: unix_millis(),
        }
    }
}

/// Host-controlled room settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSettings {
    pub max_players: usize,
    /// Round length in seconds
    pub round_interval: u32,
    pub playlist_id: String,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            max_players: 8,
            round_interval: 30,
            playlist_id: "default".to_string(),
        }
    }
}

/// Partial settings; absent fields keep their current value
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub max_players: Option<usize>,
    pub round_interval: Option<u32>,
    pub playlist_id: Option<String>,
}

impl SettingsUpdate {
    /// Fill unspecified fields from `base`
    pub fn apply_to(self, base: &RoomSettings) -> RoomSettings {
        RoomSettings {
            max_players: self.max_players.unwrap_or(base.max_players),
            round_interval: self.round_interval.unwrap_or(base.round_interval),
            playlist_id: self.playlist_id.unwrap_or_else(|| base.playlist_id.clone()),
        }
    }
}

/// A game room
#[derive(Debug)]
pub struct Room {
    pub code: RoomCode,
    pub host_id: PlayerId,
    /// Members in join order
    pub players: Vec<Player>,
    pub settings: RoomSettings,
    pub game: GameState,
    pub created_at: Instant,
}

impl Room {
    /// Create a room with the host as its only member
    pub fn new(code: RoomCode, host: Player, settings: RoomSettings) -> Self {
        Self {
            code,
            host_id: host.id,
            players: vec![host],
            settings,
            game: GameState::default(),
            created_at: Instant::now(),
        }
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.player(id).is_some()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.settings.max_players
    }

    pub fn is_host(&self, id: PlayerId) -> bool {
        self.host_id == id
    }

    pub fn nickname_taken(&self, nickname: &str) -> bool {
        self.players.iter().any(|p| p.nickname == nickname)
    }

    pub fn player_ids(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.players.iter().map(|p| p.id)
    }

    /// Remove a player, promoting the next one if the host left
    ///
    /// Returns the removed player and the new host id, if any.
    pub fn remove_player(&mut self, id: PlayerId) -> Option<(Player, Option<PlayerId>)> {
        let index = self.players.iter().position(|p| p.id == id)?;
        let removed = self.players.remove(index);

        let mut new_host = None;
        if removed.is_host {
            if let Some(next) = self.players.first_mut() {
                next.is_host = true;
                self.host_id = next.id;
                new_host = Some(next.id);
            }
        }

        Some((removed, new_host))
    }

    /// Serializable snapshot of the room
    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            code: self.code.clone(),
            host_id: self.host_id,
            players: self.players.clone(),
            settings: self.settings.clone(),
            is_playing: self.game.is_playing,
            current_round: self.game.current_round,
            total_rounds: self.game.total_rounds,
        }
    }
}

/// Room state as sent to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub code: RoomCode,
    pub host_id: PlayerId,
    pub players: Vec<Player>,
    pub settings: RoomSettings,
    pub is_playing: bool,
    pub current_round: u32,
    pub total_rounds: u32,
}
