//! Game engine
//!
//! Drives a room through its round lifecycle:
//!
//! ```text
//! Idle -> Playing -> RoundStaged -> RoundActive -> RoundEnded -> RoundStaged ... -> Idle
//! ```
//!
//! A staged round only becomes active once every current player has
//! acknowledged it (the ready barrier). Completed games are appended to an
//! in-memory history.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::AppError;
use crate::matcher;
use crate::playlist::{Playlist, PlaylistStore};
use crate::room::Room;
use crate::scoring::{calculate_score, streak_bonus};
use crate::track::Track;
use crate::types::{unix_millis, PlayerId, RoomCode};

/// Per-room game state, reset in place between games
#[derive(Debug, Default)]
pub struct GameState {
    pub is_playing: bool,
    /// 0 until the first round is activated
    pub current_round: u32,
    pub total_rounds: u32,
    /// Track being judged in the live round
    pub current_track: Option<Track>,
    /// Track staged for the upcoming round
    pub next_track: Option<Track>,
    pub round_started_at: Option<Instant>,
    /// Submissions for the live round, in submission order
    pub answers: Vec<AnswerSubmission>,
    pub scores: HashMap<PlayerId, u32>,
    pub streaks: HashMap<PlayerId, u32>,
    pub correct_counts: HashMap<PlayerId, u32>,
    pub max_streaks: HashMap<PlayerId, u32>,
    pub ready_players: HashSet<PlayerId>,
    pub waiting_for_ready: bool,
    /// Ordered tracks for the whole game, fixed once resolved
    pub tracks: Vec<Track>,
}

impl GameState {
    pub fn has_answered(&self, player_id: PlayerId) -> bool {
        self.answers.iter().any(|a| a.player_id == player_id)
    }

    /// Playing but the track list has not been resolved yet
    pub fn is_loading_tracks(&self) -> bool {
        self.is_playing && self.tracks.is_empty()
    }

    pub fn is_round_active(&self) -> bool {
        self.is_playing && self.current_track.is_some()
    }

    fn score_of(&self, player_id: PlayerId) -> u32 {
        self.scores.get(&player_id).copied().unwrap_or(0)
    }

    fn streak_of(&self, player_id: PlayerId) -> u32 {
        self.streaks.get(&player_id).copied().unwrap_or(0)
    }

    pub fn score_board(&self) -> BTreeMap<PlayerId, u32> {
        self.scores.iter().map(|(k, v)| (*k, *v)).collect()
    }

    pub fn streak_board(&self) -> BTreeMap<PlayerId, u32> {
        self.streaks.iter().map(|(k, v)| (*k, *v)).collect()
    }
}

/// One player's answer for one round
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerSubmission {
    pub player_id: PlayerId,
    pub answer: String,
    /// Milliseconds since the round started
    pub elapsed_ms: u64,
    pub is_correct: bool,
    /// Points awarded for this answer, streak bonus included
    pub score: u32,
}

/// Verdict returned to the submitting player
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerCheckResult {
    pub is_correct: bool,
    pub score: u32,
    pub message: String,
    pub streak: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundResult {
    pub round_number: u32,
    /// Full track, answers revealed
    pub track: Track,
    pub answers: Vec<AnswerSubmission>,
    pub correct_answers: Vec<AnswerSubmission>,
    pub scores: BTreeMap<PlayerId, u32>,
    pub streaks: BTreeMap<PlayerId, u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Standing {
    pub player_id: PlayerId,
    pub nickname: String,
    pub score: u32,
    pub correct_answers: u32,
    pub max_streak: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Winner {
    pub player_id: PlayerId,
    pub nickname: String,
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameResult {
    pub room_code: RoomCode,
    pub total_rounds: u32,
    /// Sorted by score, highest first; ties keep join order
    pub final_scores: Vec<Standing>,
    pub winner: Option<Winner>,
    pub played_at: u64,
}

/// Ready barrier progress after a player acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyStatus {
    pub ready_count: usize,
    pub total_players: usize,
    pub all_ready: bool,
}

/// Round lifecycle and scoring for every room
pub struct GameEngine {
    playlists: Arc<dyn PlaylistStore>,
    history: Vec<GameResult>,
}

impl GameEngine {
    pub fn new(playlists: Arc<dyn PlaylistStore>) -> Self {
        Self {
            playlists,
            history: Vec::new(),
        }
    }

    pub fn playlists(&self) -> &dyn PlaylistStore {
        self.playlists.as_ref()
    }

    /// Enter the provisional playing state
    ///
    /// Returns the playlist whose tracks must be resolved before the first
    /// round can be staged.
    pub fn start_game(&self, room: &mut Room) -> Result<Playlist, AppError> {
        if room.game.is_playing {
            return Err(AppError::AlreadyPlaying);
        }
        if room.players.is_empty() {
            return Err(AppError::NoPlayers);
        }
        let playlist = self
            .playlists
            .get(&room.settings.playlist_id)
            .ok_or_else(|| AppError::PlaylistNotFound(room.settings.playlist_id.clone()))?;

        let ids: Vec<PlayerId> = room.player_ids().collect();
        let game = &mut room.game;
        game.is_playing = true;
        game.current_round = 0;
        game.total_rounds = playlist.round_count();
        game.current_track = None;
        game.next_track = None;
        game.round_started_at = None;
        game.answers.clear();
        game.tracks.clear();
        game.ready_players.clear();
        game.waiting_for_ready = false;

        let zeroed = |ids: &[PlayerId]| ids.iter().map(|id| (*id, 0)).collect::<HashMap<_, _>>();
        game.scores = zeroed(&ids);
        game.streaks = zeroed(&ids);
        game.correct_counts = zeroed(&ids);
        game.max_streaks = zeroed(&ids);

        info!(
            "Game started in room {} with playlist '{}' ({} rounds)",
            room.code, playlist.name, game.total_rounds
        );
        Ok(playlist)
    }

    /// Store the resolved track list for the running game
    pub fn set_tracks(&self, room: &mut Room, tracks: Vec<Track>) {
        debug!("Room {} loaded {} tracks", room.code, tracks.len());
        room.game.tracks = tracks;
    }

    /// Undo a start whose track resolution failed
    pub fn rollback_start(&self, room: &mut Room) {
        let game = &mut room.game;
        game.is_playing = false;
        game.current_round = 0;
        game.total_rounds = 0;
        game.tracks.clear();
        game.next_track = None;
        game.ready_players.clear();
        game.waiting_for_ready = false;
        info!("Game start rolled back in room {}", room.code);
    }

    /// Stage the next round's track and open the ready barrier
    ///
    /// Tracks are picked cyclically so every round has one even when the
    /// playlist is shorter than the round count. Returns None when no
    /// further round exists.
    pub fn prepare_next_round(&self, room: &mut Room) -> Option<Track> {
        let game = &mut room.game;
        let next_round = game.current_round + 1;
        if game.tracks.is_empty() || next_round > game.total_rounds {
            return None;
        }

        let index = (next_round as usize - 1) % game.tracks.len();
        let track = game.tracks[index].clone();

        game.next_track = Some(track.clone());
        game.waiting_for_ready = true;
        game.ready_players.clear();

        info!(
            "Room {} staged round {}/{}: {}",
            room.code, next_round, game.total_rounds, track.name
        );
        Some(track)
    }

    /// Record a player's acknowledgement of the staged round
    pub fn mark_player_ready(
        &self,
        room: &mut Room,
        player_id: PlayerId,
    ) -> Result<ReadyStatus, AppError> {
        if !room.contains(player_id) {
            return Err(AppError::PlayerNotInRoom);
        }
        if !room.game.waiting_for_ready {
            return Err(AppError::NotWaitingForReady);
        }

        room.game.ready_players.insert(player_id);
        let all_ready = self.is_all_players_ready(room);

        Ok(ReadyStatus {
            ready_count: room.game.ready_players.len(),
            total_players: room.player_count(),
            all_ready,
        })
    }

    /// True when every current player is in the ready set
    pub fn is_all_players_ready(&self, room: &Room) -> bool {
        room.player_ids()
            .all(|id| room.game.ready_players.contains(&id))
    }

    pub fn activate_prepared_round(&self, room: &mut Room) -> Result<(Track, u32), AppError> {
        self.activate_prepared_round_at(room, Instant::now())
    }

    /// Make the staged track live once the barrier is satisfied
    pub fn activate_prepared_round_at(
        &self,
        room: &mut Room,
        now: Instant,
    ) -> Result<(Track, u32), AppError> {
        if !room.game.is_playing {
            return Err(AppError::NotPlaying);
        }
        if room.game.next_track.is_none() {
            return Err(AppError::NoPreparedTrack);
        }
        if !self.is_all_players_ready(room) {
            return Err(AppError::PlayersNotReady);
        }

        let game = &mut room.game;
        let track = game.next_track.take().ok_or(AppError::NoPreparedTrack)?;
        game.current_round += 1;
        game.answers.clear();
        game.current_track = Some(track.clone());
        game.round_started_at = Some(now);
        game.ready_players.clear();
        game.waiting_for_ready = false;

        info!(
            "Room {} round {}/{} started",
            room.code, game.current_round, game.total_rounds
        );
        Ok((track, game.current_round))
    }

    pub fn submit_answer(
        &self,
        room: &mut Room,
        player_id: PlayerId,
        answer: &str,
    ) -> Result<AnswerCheckResult, AppError> {
        self.submit_answer_at(room, player_id, answer, Instant::now())
    }

    /// Judge and score a player's single answer for the live round
    pub fn submit_answer_at(
        &self,
        room: &mut Room,
        player_id: PlayerId,
        answer: &str,
        now: Instant,
    ) -> Result<AnswerCheckResult, AppError> {
        if !room.game.is_playing {
            return Err(AppError::NotPlaying);
        }
        let Some(track) = room.game.current_track.as_ref() else {
            return Err(AppError::NoActiveTrack);
        };
        let Some(player) = room.player(player_id) else {
            return Err(AppError::PlayerNotInRoom);
        };
        if room.game.has_answered(player_id) {
            return Err(AppError::AlreadySubmitted);
        }

        let accepted = track.acceptable_answers();
        let is_correct = matcher::is_correct(answer, &accepted[..]);
        let elapsed_ms = room
            .game
            .round_started_at
            .map(|start| now.saturating_duration_since(start).as_millis() as u64)
            .unwrap_or(0);

        let base = if is_correct {
            calculate_score(elapsed_ms, room.settings.round_interval)
        } else {
            0
        };
        let streak = if is_correct {
            room.game.streak_of(player_id).saturating_add(1)
        } else {
            0
        };
        let awarded = base.saturating_add(streak_bonus(streak));

        let message = if is_correct {
            format!("Correct! +{} points", awarded)
        } else {
            format!("Wrong. The answer was {}", track.name)
        };

        info!(
            "Room {} round {}: {} answered {:?} - {} ({}ms, +{})",
            room.code,
            room.game.current_round,
            player.nickname,
            answer,
            if is_correct { "correct" } else { "wrong" },
            elapsed_ms,
            awarded
        );

        let game = &mut room.game;
        let total = game.score_of(player_id).saturating_add(awarded);
        game.scores.insert(player_id, total);
        game.streaks.insert(player_id, streak);
        if is_correct {
            let count = game.correct_counts.entry(player_id).or_insert(0);
            *count = count.saturating_add(1);
            let best = game.max_streaks.entry(player_id).or_insert(0);
            *best = (*best).max(streak);
        }
        game.answers.push(AnswerSubmission {
            player_id,
            answer: answer.to_string(),
            elapsed_ms,
            is_correct,
            score: awarded,
        });

        Ok(AnswerCheckResult {
            is_correct,
            score: awarded,
            message,
            streak,
        })
    }

    /// True when every current player has answered the live round
    pub fn all_players_answered(&self, room: &Room) -> bool {
        room.game.is_round_active() && room.player_ids().all(|id| room.game.has_answered(id))
    }

    /// Close the live round and summarize it
    pub fn end_round(&self, room: &mut Room) -> Result<RoundResult, AppError> {
        if !room.game.is_playing {
            return Err(AppError::NotPlaying);
        }
        let game = &mut room.game;
        let track = game.current_track.take().ok_or(AppError::NoActiveRound)?;

        let answers = game.answers.clone();
        let correct_answers: Vec<AnswerSubmission> =
            answers.iter().filter(|a| a.is_correct).cloned().collect();

        game.waiting_for_ready = true;
        game.ready_players.clear();

        info!(
            "Room {} round {} ended: {}/{} correct",
            room.code,
            game.current_round,
            correct_answers.len(),
            room.players.len()
        );

        Ok(RoundResult {
            round_number: game.current_round,
            track,
            answers,
            correct_answers,
            scores: game.score_board(),
            streaks: game.streak_board(),
        })
    }

    /// Rank players, record the result and return the room to idle
    pub fn end_game(&mut self, room: &mut Room) -> Result<GameResult, AppError> {
        if !room.game.is_playing {
            return Err(AppError::NotPlaying);
        }

        let game = &room.game;
        let mut final_scores: Vec<Standing> = room
            .players
            .iter()
            .map(|p| Standing {
                player_id: p.id,
                nickname: p.nickname.clone(),
                score: game.score_of(p.id),
                correct_answers: game.correct_counts.get(&p.id).copied().unwrap_or(0),
                max_streak: game.max_streaks.get(&p.id).copied().unwrap_or(0),
            })
            .collect();
        // Stable: equal scores keep join order
        final_scores.sort_by(|a, b| b.score.cmp(&a.score));

        let winner = final_scores.first().map(|s| Winner {
            player_id: s.player_id,
            nickname: s.nickname.clone(),
            score: s.score,
        });

        let result = GameResult {
            room_code: room.code.clone(),
            total_rounds: game.total_rounds,
            final_scores,
            winner,
            played_at: unix_millis(),
        };
        self.history.push(result.clone());

        // Scores and streaks stay until the next start
        let game = &mut room.game;
        game.is_playing = false;
        game.current_round = 0;
        game.current_track = None;
        game.next_track = None;
        game.round_started_at = None;
        game.answers.clear();
        game.ready_players.clear();
        game.waiting_for_ready = false;
        game.tracks.clear();

        match &result.winner {
            Some(w) => info!("Game ended in room {}: {} won with {}", room.code, w.nickname, w.score),
            None => info!("Game ended in room {} without players", room.code),
        }
        Ok(result)
    }

    /// Copy of every completed game, oldest first
    pub fn game_history(&self) -> Vec<GameResult> {
        self.history.clone()
    }
}
