//! Room registry
//!
//! Owns every active room. Rooms are created by their host and destroyed
//! as soon as the last player leaves.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::error::AppError;
use crate::room::{Player, Room, RoomSettings, SettingsUpdate};
use crate::types::{PlayerId, RoomCode};

/// Result of a player leaving a room
#[derive(Debug, Clone, PartialEq)]
pub struct LeaveOutcome {
    pub player: Player,
    pub room_deleted: bool,
    pub new_host_id: Option<PlayerId>,
}

/// All active rooms, keyed by code
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<RoomCode, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a room with a fresh unique code and the host already joined
    pub fn create_room(
        &mut self,
        host_id: PlayerId,
        host_nickname: String,
        settings: RoomSettings,
    ) -> &Room {
        let code = loop {
            let code = RoomCode::generate();
            if !self.rooms.contains_key(&code) {
                break code;
            }
        };

        info!("Room {} created by {} ({})", code, host_nickname, host_id);

        let host = Player::new(host_id, host_nickname, true);
        self.rooms
            .entry(code.clone())
            .or_insert_with(|| Room::new(code, host, settings))
    }

    /// Add a non-host player to an existing room
    pub fn join_room(
        &mut self,
        code: &RoomCode,
        player_id: PlayerId,
        nickname: String,
    ) -> Result<&Room, AppError> {
        let room = self
            .rooms
            .get_mut(code)
            .ok_or_else(|| AppError::RoomNotFound(code.to_string()))?;

        if room.contains(player_id) {
            return Err(AppError::AlreadyJoined);
        }
        if room.is_full() {
            return Err(AppError::RoomFull);
        }
        if room.game.is_playing {
            return Err(AppError::GameInProgress);
        }
        if room.nickname_taken(&nickname) {
            return Err(AppError::NicknameTaken(nickname));
        }

        info!("Player {} ({}) joined room {}", nickname, player_id, code);
        room.players.push(Player::new(player_id, nickname, false));
        Ok(&*room)
    }

    /// Remove a player; deletes the room when it becomes empty
    ///
    /// Returns None if the room or the player does not exist.
    pub fn leave_room(&mut self, code: &RoomCode, player_id: PlayerId) -> Option<LeaveOutcome> {
        let room = self.rooms.get_mut(code)?;
        let (player, new_host_id) = room.remove_player(player_id)?;
        room.game.ready_players.remove(&player_id);

        info!("Player {} left room {}", player.nickname, code);

        if room.is_empty() {
            self.rooms.remove(code);
            debug!("Room {} deleted (empty)", code);
            return Some(LeaveOutcome {
                player,
                room_deleted: true,
                new_host_id: None,
            });
        }

        if let Some(host) = new_host_id {
            info!("Player {} is now host of room {}", host, code);
        }

        Some(LeaveOutcome {
            player,
            room_deleted: false,
            new_host_id,
        })
    }

    /// Merge partial settings; host only, never during a game
    pub fn update_settings(
        &mut self,
        code: &RoomCode,
        host_id: PlayerId,
        update: SettingsUpdate,
    ) -> Result<&RoomSettings, AppError> {
        let room = self
            .rooms
            .get_mut(code)
            .ok_or_else(|| AppError::RoomNotFound(code.to_string()))?;

        if !room.is_host(host_id) {
            return Err(AppError::NotHost);
        }
        if room.game.is_playing {
            return Err(AppError::GameInProgress);
        }

        room.settings = update.apply_to(&room.settings);
        info!("Room {} settings updated: {:?}", code, room.settings);
        Ok(&room.settings)
    }

    pub fn get(&self, code: &RoomCode) -> Option<&Room> {
        self.rooms.get(code)
    }

    pub fn get_mut(&mut self, code: &RoomCode) -> Option<&mut Room> {
        self.rooms.get_mut(code)
    }

    /// Room lookup that reports a missing room as an error
    pub fn room_mut(&mut self, code: &RoomCode) -> Result<&mut Room, AppError> {
        self.rooms
            .get_mut(code)
            .ok_or_else(|| AppError::RoomNotFound(code.to_string()))
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn player_count(&self) -> usize {
        self.rooms.values().map(Room::player_count).sum()
    }
}
