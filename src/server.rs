//! GameServer Actor implementation
//!
//! The central actor that owns every room and connected client. Commands
//! from connection handlers are processed one at a time, so each engine
//! call is atomic with respect to every other command.
//!
//! Two flows leave the actor and come back as internal events:
//! - track resolution after `start-game` (commit or roll back the start)
//! - the delayed auto-end of a round once everyone has answered

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::config::ServerConfig;
use crate::error::AppError;
use crate::game::GameEngine;
use crate::message::ServerMessage;
use crate::playlist::PlaylistStore;
use crate::registry::RoomRegistry;
use crate::resolver::TrackResolver;
use crate::room::{Room, RoomSettings, SettingsUpdate};
use crate::track::Track;
use crate::types::{unix_millis, PlayerId, RoomCode};

/// Commands sent from handlers to the GameServer actor
#[derive(Debug)]
pub enum ServerCommand {
    /// New client connected
    Connect {
        client_id: PlayerId,
        sender: mpsc::Sender<ServerMessage>,
    },
    /// Client disconnected
    Disconnect { client_id: PlayerId },
    CreateRoom {
        client_id: PlayerId,
        nickname: String,
        settings: Option<SettingsUpdate>,
    },
    JoinRoom {
        client_id: PlayerId,
        room_code: String,
        nickname: String,
    },
    LeaveRoom {
        client_id: PlayerId,
        room_code: String,
    },
    UpdateSettings {
        client_id: PlayerId,
        room_code: String,
        settings: SettingsUpdate,
    },
    StartGame {
        client_id: PlayerId,
        room_code: String,
    },
    PlayerReady {
        client_id: PlayerId,
        room_code: String,
    },
    SubmitAnswer {
        client_id: PlayerId,
        room_code: String,
        answer: String,
    },
    NextRound {
        client_id: PlayerId,
        room_code: String,
    },
    /// Host ends the game early
    EndGame {
        client_id: PlayerId,
        room_code: String,
    },
    Chat {
        client_id: PlayerId,
        room_code: String,
        message: String,
    },
    ListPlaylists { client_id: PlayerId },
    GetHistory { client_id: PlayerId },
}

/// Events the actor schedules for itself
#[derive(Debug)]
enum InternalEvent {
    TracksResolved {
        room_code: RoomCode,
        token: u64,
        result: Result<Vec<Track>, String>,
    },
    AutoEndRound {
        room_code: RoomCode,
        round: u32,
        arm: u64,
    },
}

/// A start-game waiting for its tracks
#[derive(Debug, Clone, Copy)]
struct PendingStart {
    token: u64,
    requester: PlayerId,
}

/// An armed auto-end timer; `arm` is unique across games
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AutoEndTimer {
    round: u32,
    arm: u64,
}

/// The main GameServer actor
pub struct GameServer {
    /// All connected clients: PlayerId -> Client
    clients: HashMap<PlayerId, Client>,
    registry: RoomRegistry,
    engine: GameEngine,
    resolver: Arc<dyn TrackResolver>,
    config: ServerConfig,
    /// Starts waiting on track resolution, by room
    pending_starts: HashMap<RoomCode, PendingStart>,
    next_start_token: u64,
    /// Auto-end timer currently armed, by room
    pending_auto_end: HashMap<RoomCode, AutoEndTimer>,
    next_timer_arm: u64,
    /// Command receiver channel
    receiver: mpsc::Receiver<ServerCommand>,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
    internal_rx: mpsc::UnboundedReceiver<InternalEvent>,
}

impl GameServer {
    /// Create a new GameServer with the given command receiver and collaborators
    pub fn new(
        receiver: mpsc::Receiver<ServerCommand>,
        playlists: Arc<dyn PlaylistStore>,
        resolver: Arc<dyn TrackResolver>,
        config: ServerConfig,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            clients: HashMap::new(),
            registry: RoomRegistry::new(),
            engine: GameEngine::new(playlists),
            resolver,
            config,
            pending_starts: HashMap::new(),
            next_start_token: 0,
            pending_auto_end: HashMap::new(),
            next_timer_arm: 0,
            receiver,
            internal_tx,
            internal_rx,
        }
    }

    /// Run the GameServer event loop
    ///
    /// Continuously receives and processes commands until all senders are dropped.
    pub async fn run(mut self) {
        info!("GameServer started");

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                Some(event) = self.internal_rx.recv() => {
                    self.handle_internal(event).await;
                }
            }
        }

        info!("GameServer shutting down");
    }

    /// Process a single command, reporting failures to its sender only
    async fn handle_command(&mut self, cmd: ServerCommand) {
        let (client_id, result) = match cmd {
            ServerCommand::Connect { client_id, sender } => {
                self.handle_connect(client_id, sender);
                return;
            }
            ServerCommand::Disconnect { client_id } => {
                self.handle_disconnect(client_id).await;
                return;
            }
            ServerCommand::CreateRoom {
                client_id,
                nickname,
                settings,
            } => (
                client_id,
                self.handle_create_room(client_id, nickname, settings).await,
            ),
            ServerCommand::JoinRoom {
                client_id,
                room_code,
                nickname,
            } => (
                client_id,
                self.handle_join_room(client_id, RoomCode::from_string(room_code), nickname)
                    .await,
            ),
            ServerCommand::LeaveRoom {
                client_id,
                room_code,
            } => (
                client_id,
                self.handle_leave_room(client_id, RoomCode::from_string(room_code))
                    .await,
            ),
            ServerCommand::UpdateSettings {
                client_id,
                room_code,
                settings,
            } => (
                client_id,
                self.handle_update_settings(client_id, RoomCode::from_string(room_code), settings)
                    .await,
            ),
            ServerCommand::StartGame {
                client_id,
                room_code,
            } => (
                client_id,
                self.handle_start_game(client_id, RoomCode::from_string(room_code)),
            ),
            ServerCommand::PlayerReady {
                client_id,
                room_code,
            } => (
                client_id,
                self.handle_player_ready(client_id, RoomCode::from_string(room_code))
                    .await,
            ),
            ServerCommand::SubmitAnswer {
                client_id,
                room_code,
                answer,
            } => (
                client_id,
                self.handle_submit_answer(client_id, RoomCode::from_string(room_code), answer)
                    .await,
            ),
            ServerCommand::NextRound {
                client_id,
                room_code,
            } => (
                client_id,
                self.handle_next_round(client_id, RoomCode::from_string(room_code))
                    .await,
            ),
            ServerCommand::EndGame {
                client_id,
                room_code,
            } => (
                client_id,
                self.handle_end_game(client_id, RoomCode::from_string(room_code))
                    .await,
            ),
            ServerCommand::Chat {
                client_id,
                room_code,
                message,
            } => (
                client_id,
                self.handle_chat(client_id, RoomCode::from_string(room_code), message)
                    .await,
            ),
            ServerCommand::ListPlaylists { client_id } => {
                let playlists = self.engine.playlists().list();
                self.reply(client_id, ServerMessage::Playlists { playlists })
                    .await;
                return;
            }
            ServerCommand::GetHistory { client_id } => {
                let games = self.engine.game_history();
                self.reply(client_id, ServerMessage::History { games }).await;
                return;
            }
        };

        if let Err(e) = result {
            debug!("Command from {} rejected: {}", client_id, e);
            self.reply(client_id, e.into()).await;
        }
    }

    async fn handle_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::TracksResolved {
                room_code,
                token,
                result,
            } => self.on_tracks_resolved(room_code, token, result).await,
            InternalEvent::AutoEndRound {
                room_code,
                round,
                arm,
            } => self.on_auto_end_round(room_code, round, arm).await,
        }
    }

    /// Handle new client connection
    fn handle_connect(&mut self, client_id: PlayerId, sender: mpsc::Sender<ServerMessage>) {
        info!("Client {} connected", client_id);
        self.clients.insert(client_id, Client::new(client_id, sender));
        debug!(
            "Total clients: {}, Total rooms: {}",
            self.clients.len(),
            self.registry.room_count()
        );
    }

    /// Handle client disconnection
    async fn handle_disconnect(&mut self, client_id: PlayerId) {
        info!("Client {} disconnected", client_id);

        let room = self.clients.get_mut(&client_id).and_then(|c| c.room.take());
        if let Some(code) = room {
            self.remove_from_room(client_id, &code).await;
        }
        self.clients.remove(&client_id);

        debug!(
            "Total clients: {}, Total rooms: {}",
            self.clients.len(),
            self.registry.room_count()
        );
    }

    async fn handle_create_room(
        &mut self,
        client_id: PlayerId,
        nickname: String,
        settings: Option<SettingsUpdate>,
    ) -> Result<(), AppError> {
        let Some(client) = self.clients.get_mut(&client_id) else {
            return Ok(());
        };
        if client.is_in_room() {
            return Err(AppError::AlreadyInRoom);
        }
        let nickname = valid_nickname(nickname)?;

        let base = RoomSettings {
            playlist_id: self.config.default_playlist.clone(),
            ..RoomSettings::default()
        };
        let settings = settings.unwrap_or_default().apply_to(&base);

        let room = self.registry.create_room(client_id, nickname, settings);
        client.room = Some(room.code.clone());
        let snapshot = room.snapshot();

        self.reply(client_id, ServerMessage::RoomCreated { room: snapshot })
            .await;
        Ok(())
    }

    async fn handle_join_room(
        &mut self,
        client_id: PlayerId,
        code: RoomCode,
        nickname: String,
    ) -> Result<(), AppError> {
        let Some(client) = self.clients.get_mut(&client_id) else {
            return Ok(());
        };
        if client.is_in_room() {
            return Err(AppError::AlreadyInRoom);
        }
        let nickname = valid_nickname(nickname)?;

        let room = self.registry.join_room(&code, client_id, nickname)?;
        client.room = Some(code.clone());
        let snapshot = room.snapshot();
        let player = room.player(client_id).cloned();

        self.reply(client_id, ServerMessage::RoomJoined { room: snapshot })
            .await;
        if let Some(player) = player {
            self.broadcast_except(&code, client_id, ServerMessage::PlayerJoined { player })
                .await;
        }
        Ok(())
    }

    async fn handle_leave_room(
        &mut self,
        client_id: PlayerId,
        code: RoomCode,
    ) -> Result<(), AppError> {
        let Some(client) = self.clients.get_mut(&client_id) else {
            return Ok(());
        };
        if !client.is_in(&code) {
            return Err(AppError::NotInRoom);
        }
        client.room = None;

        self.remove_from_room(client_id, &code).await;
        self.reply(client_id, ServerMessage::ack("leave-room")).await;
        Ok(())
    }

    async fn handle_update_settings(
        &mut self,
        client_id: PlayerId,
        code: RoomCode,
        update: SettingsUpdate,
    ) -> Result<(), AppError> {
        let settings = self
            .registry
            .update_settings(&code, client_id, update)?
            .clone();

        self.reply(client_id, ServerMessage::ack("update-settings"))
            .await;
        self.broadcast(&code, ServerMessage::SettingsUpdated { settings })
            .await;
        Ok(())
    }

    /// Flip the room to playing and resolve its tracks off the actor
    ///
    /// The host is answered once the tracks arrive (see `on_tracks_resolved`).
    fn handle_start_game(&mut self, client_id: PlayerId, code: RoomCode) -> Result<(), AppError> {
        let room = self.registry.room_mut(&code)?;
        if !room.is_host(client_id) {
            return Err(AppError::NotHost);
        }
        let playlist = self.engine.start_game(room)?;

        self.next_start_token += 1;
        let token = self.next_start_token;
        self.pending_starts.insert(
            code.clone(),
            PendingStart {
                token,
                requester: client_id,
            },
        );

        let resolver = Arc::clone(&self.resolver);
        let internal_tx = self.internal_tx.clone();
        let timeout = self.config.resolve_timeout;
        tokio::spawn(async move {
            // A panicking or hung resolver must still report back
            let mut task = tokio::spawn(async move { resolver.resolve(&playlist.tracks).await });
            let result = match tokio::time::timeout(timeout, &mut task).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(format!("track resolver failed: {}", e)),
                Err(_) => {
                    task.abort();
                    Err(format!("track resolution timed out after {:?}", timeout))
                }
            };
            let _ = internal_tx.send(InternalEvent::TracksResolved {
                room_code: code,
                token,
                result,
            });
        });

        Ok(())
    }

    /// Commit the start with the resolved tracks, or roll it back
    async fn on_tracks_resolved(
        &mut self,
        code: RoomCode,
        token: u64,
        result: Result<Vec<Track>, String>,
    ) {
        match self.pending_starts.get(&code) {
            Some(pending) if pending.token == token => {}
            _ => {
                debug!("Ignoring stale track resolution for room {}", code);
                return;
            }
        }
        let Some(pending) = self.pending_starts.remove(&code) else {
            return;
        };
        let Some(room) = self.registry.get_mut(&code) else {
            return;
        };
        if !room.game.is_playing {
            debug!("Room {} stopped playing before tracks arrived", code);
            return;
        }

        let failure = match result {
            Ok(tracks) if tracks.is_empty() => Some(AppError::TrackLoad("no playable tracks".to_string())),
            Ok(tracks) => {
                self.engine.set_tracks(room, tracks);
                match self.engine.prepare_next_round(room) {
                    Some(_) => None,
                    None => Some(AppError::RoundUnavailable),
                }
            }
            Err(reason) => Some(AppError::TrackLoad(reason)),
        };

        if let Some(err) = failure {
            warn!("Game start failed in room {}: {}", code, err);
            self.engine.rollback_start(room);
            self.reply(pending.requester, err.into()).await;
            return;
        }

        let started = ServerMessage::GameStarted {
            total_rounds: room.game.total_rounds,
            players: room.players.clone(),
        };
        let prepare = prepare_round_message(room);

        self.reply(pending.requester, ServerMessage::ack("start-game"))
            .await;
        self.broadcast(&code, started).await;
        if let Some(prepare) = prepare {
            self.broadcast(&code, prepare).await;
        }
    }

    async fn handle_player_ready(
        &mut self,
        client_id: PlayerId,
        code: RoomCode,
    ) -> Result<(), AppError> {
        let room = self.registry.room_mut(&code)?;
        if room.game.is_loading_tracks() {
            return Err(AppError::NoTracksLoaded);
        }
        let status = self.engine.mark_player_ready(room, client_id)?;
        let nickname = room
            .player(client_id)
            .map(|p| p.nickname.clone())
            .unwrap_or_default();
        let can_start = status.all_ready && room.game.next_track.is_some();

        self.reply(client_id, ServerMessage::ack("player-ready")).await;
        self.broadcast(
            &code,
            ServerMessage::PlayerReadyStatus {
                player_id: client_id,
                nickname,
                ready_count: status.ready_count,
                total_players: status.total_players,
            },
        )
        .await;

        if can_start {
            info!("All players ready in room {}", code);
            self.activate_round(&code).await;
        }
        Ok(())
    }

    /// Bring the staged round live and announce it
    async fn activate_round(&mut self, code: &RoomCode) {
        let Some(room) = self.registry.get_mut(code) else {
            return;
        };
        match self.engine.activate_prepared_round(room) {
            Ok((track, round_number)) => {
                let msg = ServerMessage::RoundStarted {
                    round_number,
                    track: track.view(),
                    duration: room.settings.round_interval,
                };
                self.broadcast(code, msg).await;
            }
            Err(e) => debug!("Room {} round not activated: {}", code, e),
        }
    }

    async fn handle_submit_answer(
        &mut self,
        client_id: PlayerId,
        code: RoomCode,
        answer: String,
    ) -> Result<(), AppError> {
        let room = self.registry.room_mut(&code)?;
        let result = self.engine.submit_answer(room, client_id, &answer)?;

        let nickname = room
            .player(client_id)
            .map(|p| p.nickname.clone())
            .unwrap_or_default();
        let scores = ServerMessage::ScoreUpdated {
            scores: room.game.score_board(),
            streaks: room.game.streak_board(),
        };
        let all_answered = self.engine.all_players_answered(room);
        let round = room.game.current_round;
        let is_correct = result.is_correct;

        self.reply(client_id, ServerMessage::AnswerResult { result })
            .await;
        self.broadcast_except(
            &code,
            client_id,
            ServerMessage::AnswerSubmitted {
                player_id: client_id,
                nickname,
                has_answered: true,
                is_correct,
                timestamp: unix_millis(),
            },
        )
        .await;
        self.broadcast(&code, scores).await;

        if all_answered {
            self.schedule_auto_end(code, round);
        }
        Ok(())
    }

    /// Arm the delayed end of `round`, once per round
    fn schedule_auto_end(&mut self, code: RoomCode, round: u32) {
        if self
            .pending_auto_end
            .get(&code)
            .is_some_and(|timer| timer.round == round)
        {
            return;
        }
        info!(
            "All players answered in room {}, ending round {} in {:?}",
            code, round, self.config.auto_end_delay
        );
        self.next_timer_arm += 1;
        let arm = self.next_timer_arm;
        self.pending_auto_end
            .insert(code.clone(), AutoEndTimer { round, arm });

        let delay = self.config.auto_end_delay;
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = internal_tx.send(InternalEvent::AutoEndRound {
                room_code: code,
                round,
                arm,
            });
        });
    }

    /// End the round if it is still the one the timer was armed for
    async fn on_auto_end_round(&mut self, code: RoomCode, round: u32, arm: u64) {
        if self.pending_auto_end.get(&code) != Some(&AutoEndTimer { round, arm }) {
            debug!("Auto-end timer {} for room {} was disarmed", arm, code);
            return;
        }
        self.pending_auto_end.remove(&code);

        let still_live = self
            .registry
            .get(&code)
            .is_some_and(|r| r.game.is_round_active() && r.game.current_round == round);
        if !still_live {
            debug!("Auto-end for room {} round {} is stale", code, round);
            return;
        }

        if let Err(e) = self.finish_round(&code).await {
            debug!("Auto-end in room {} failed: {}", code, e);
        }
    }

    /// End the live round and broadcast its result
    async fn finish_round(&mut self, code: &RoomCode) -> Result<(), AppError> {
        let room = self.registry.room_mut(code)?;
        let result = self.engine.end_round(room)?;
        self.pending_auto_end.remove(code);
        self.broadcast(code, ServerMessage::RoundEnded { result })
            .await;
        Ok(())
    }

    async fn handle_next_round(
        &mut self,
        client_id: PlayerId,
        code: RoomCode,
    ) -> Result<(), AppError> {
        let room = self.registry.room_mut(&code)?;
        if !room.is_host(client_id) {
            return Err(AppError::NotHost);
        }
        if !room.game.is_playing {
            return Err(AppError::NotPlaying);
        }
        if room.game.is_loading_tracks() {
            return Err(AppError::NoTracksLoaded);
        }

        if room.game.is_round_active() {
            self.finish_round(&code).await?;
        }

        let room = self.registry.room_mut(&code)?;
        if room.game.current_round >= room.game.total_rounds {
            let result = self.engine.end_game(room)?;
            self.pending_starts.remove(&code);
            self.pending_auto_end.remove(&code);
            self.reply(client_id, ServerMessage::ack("next-round")).await;
            self.broadcast(
                &code,
                ServerMessage::GameEnd {
                    result,
                    forced: false,
                },
            )
            .await;
            return Ok(());
        }

        self.engine
            .prepare_next_round(room)
            .ok_or(AppError::RoundUnavailable)?;
        let prepare = prepare_round_message(room);

        self.reply(client_id, ServerMessage::ack("next-round")).await;
        if let Some(prepare) = prepare {
            self.broadcast(&code, prepare).await;
        }
        Ok(())
    }

    /// Host ends the game before the last round
    async fn handle_end_game(&mut self, client_id: PlayerId, code: RoomCode) -> Result<(), AppError> {
        let room = self.registry.room_mut(&code)?;
        if !room.is_host(client_id) {
            return Err(AppError::NotHost);
        }
        let result = self.engine.end_game(room)?;
        self.pending_starts.remove(&code);
        self.pending_auto_end.remove(&code);

        info!("Game force-ended by host in room {}", code);
        self.reply(client_id, ServerMessage::ack("game-end")).await;
        self.broadcast(
            &code,
            ServerMessage::GameEnd {
                result,
                forced: true,
            },
        )
        .await;
        Ok(())
    }

    async fn handle_chat(
        &mut self,
        client_id: PlayerId,
        code: RoomCode,
        message: String,
    ) -> Result<(), AppError> {
        let message = message.trim();
        if message.is_empty() {
            return Ok(());
        }
        let room = self
            .registry
            .get(&code)
            .ok_or_else(|| AppError::RoomNotFound(code.to_string()))?;
        let player = room.player(client_id).ok_or(AppError::PlayerNotInRoom)?;

        let msg = ServerMessage::NewMessage {
            player_id: client_id,
            nickname: player.nickname.clone(),
            message: message.to_string(),
            timestamp: unix_millis(),
        };
        self.broadcast(&code, msg).await;
        Ok(())
    }

    /// Helper: Remove a player from their room and keep the game moving
    async fn remove_from_room(&mut self, client_id: PlayerId, code: &RoomCode) {
        let Some(outcome) = self.registry.leave_room(code, client_id) else {
            return;
        };

        if outcome.room_deleted {
            self.pending_starts.remove(code);
            self.pending_auto_end.remove(code);
            return;
        }

        self.broadcast(
            code,
            ServerMessage::PlayerLeft {
                player_id: client_id,
                nickname: outcome.player.nickname,
                new_host_id: outcome.new_host_id,
            },
        )
        .await;

        // The departed player may have been the last one the barrier or
        // the round was waiting on
        let Some(room) = self.registry.get(code) else {
            return;
        };
        let can_start = room.game.is_playing
            && room.game.waiting_for_ready
            && room.game.next_track.is_some()
            && self.engine.is_all_players_ready(room);
        let all_answered = self.engine.all_players_answered(room);
        let round = room.game.current_round;

        if can_start {
            self.activate_round(code).await;
        } else if all_answered {
            self.schedule_auto_end(code.clone(), round);
        }
    }

    /// Helper: Send a message to one client
    async fn reply(&self, client_id: PlayerId, msg: ServerMessage) {
        if let Some(client) = self.clients.get(&client_id) {
            let _ = client.send(msg).await;
        }
    }

    /// Helper: Send a message to every player in a room
    async fn broadcast(&self, code: &RoomCode, msg: ServerMessage) {
        self.send_to_room(code, None, msg).await;
    }

    /// Helper: Send a message to every player in a room but one
    async fn broadcast_except(&self, code: &RoomCode, except: PlayerId, msg: ServerMessage) {
        self.send_to_room(code, Some(except), msg).await;
    }

    async fn send_to_room(&self, code: &RoomCode, except: Option<PlayerId>, msg: ServerMessage) {
        let Some(room) = self.registry.get(code) else {
            return;
        };
        for id in room.player_ids() {
            if Some(id) == except {
                continue;
            }
            if let Some(client) = self.clients.get(&id) {
                let _ = client.send(msg.clone()).await;
            }
        }
    }
}

/// Answer-stripped announcement of the staged round
fn prepare_round_message(room: &Room) -> Option<ServerMessage> {
    room.game
        .next_track
        .as_ref()
        .map(|track| ServerMessage::PrepareRound {
            round_number: room.game.current_round + 1,
            track: track.view(),
            duration: room.settings.round_interval,
        })
}

fn valid_nickname(nickname: String) -> Result<String, AppError> {
    let trimmed = nickname.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidNickname);
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::message::ErrorCode;
    use crate::playlist::{sample_playlist, MemoryPlaylistStore, PlaylistTrack};
    use crate::resolver::PlaylistTrackResolver;

    struct FailingResolver;

    #[async_trait::async_trait]
    impl TrackResolver for FailingResolver {
        async fn resolve(&self, _entries: &[PlaylistTrack]) -> Result<Vec<Track>, String> {
            Err("metadata service unavailable".to_string())
        }
    }

    struct PanickingResolver;

    #[async_trait::async_trait]
    impl TrackResolver for PanickingResolver {
        async fn resolve(&self, _entries: &[PlaylistTrack]) -> Result<Vec<Track>, String> {
            panic!("resolver bug")
        }
    }

    struct HangingResolver;

    #[async_trait::async_trait]
    impl TrackResolver for HangingResolver {
        async fn resolve(&self, _entries: &[PlaylistTrack]) -> Result<Vec<Track>, String> {
            std::future::pending().await
        }
    }

    /// Server driven step by step instead of through `run`
    fn local_server(resolver: Arc<dyn TrackResolver>) -> GameServer {
        let store = MemoryPlaylistStore::new()
            .with(sample_playlist("default", &["a", "b"], Some(2)));
        let config = ServerConfig {
            auto_end_delay: Duration::from_millis(20),
            resolve_timeout: Duration::from_millis(200),
            ..ServerConfig::default()
        };
        let (_tx, rx) = mpsc::channel(1);
        GameServer::new(rx, Arc::new(store), resolver, config)
    }

    async fn local_client(server: &mut GameServer) -> (PlayerId, mpsc::Receiver<ServerMessage>) {
        let (sender, rx) = mpsc::channel(256);
        let client_id = PlayerId::new();
        server
            .handle_command(ServerCommand::Connect { client_id, sender })
            .await;
        (client_id, rx)
    }

    /// Handle the next internal event (resolution or timer)
    async fn next_event(server: &mut GameServer) {
        let event = tokio::time::timeout(Duration::from_secs(2), server.internal_rx.recv())
            .await
            .expect("timed out waiting for internal event")
            .expect("internal channel closed");
        server.handle_internal(event).await;
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut msgs = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            msgs.push(msg);
        }
        msgs
    }

    fn has_error(msgs: &[ServerMessage], expected: ErrorCode) -> bool {
        msgs.iter()
            .any(|m| matches!(m, ServerMessage::Error { code, .. } if *code == expected))
    }

    struct LocalRoom {
        code: RoomCode,
        host: PlayerId,
        guest: PlayerId,
        host_rx: mpsc::Receiver<ServerMessage>,
        guest_rx: mpsc::Receiver<ServerMessage>,
    }

    impl LocalRoom {
        fn room_code(&self) -> String {
            self.code.0.clone()
        }
    }

    /// Host and guest in one room, start-game sent, tracks not yet resolved
    async fn loading_room(server: &mut GameServer) -> LocalRoom {
        let (host, host_rx) = local_client(server).await;
        let (guest, guest_rx) = local_client(server).await;
        server
            .handle_command(ServerCommand::CreateRoom {
                client_id: host,
                nickname: "Host".to_string(),
                settings: None,
            })
            .await;
        let code = server.clients[&host].room.clone().unwrap();
        server
            .handle_command(ServerCommand::JoinRoom {
                client_id: guest,
                room_code: code.0.clone(),
                nickname: "Guest".to_string(),
            })
            .await;
        server
            .handle_command(ServerCommand::StartGame {
                client_id: host,
                room_code: code.0.clone(),
            })
            .await;
        LocalRoom {
            code,
            host,
            guest,
            host_rx,
            guest_rx,
        }
    }

    async fn ready_all(server: &mut GameServer, room: &LocalRoom) {
        for id in [room.host, room.guest] {
            server
                .handle_command(ServerCommand::PlayerReady {
                    client_id: id,
                    room_code: room.room_code(),
                })
                .await;
        }
    }

    async fn answer_all(server: &mut GameServer, room: &LocalRoom) {
        for id in [room.host, room.guest] {
            server
                .handle_command(ServerCommand::SubmitAnswer {
                    client_id: id,
                    room_code: room.room_code(),
                    answer: "no idea".to_string(),
                })
                .await;
        }
    }

    /// Round one live in a fresh room
    async fn live_room(server: &mut GameServer) -> LocalRoom {
        let room = loading_room(server).await;
        next_event(server).await;
        ready_all(server, &room).await;
        assert!(server.registry.get(&room.code).unwrap().game.is_round_active());
        room
    }

    fn spawn_server(resolver: Arc<dyn TrackResolver>) -> mpsc::Sender<ServerCommand> {
        let store = MemoryPlaylistStore::new()
            .with(sample_playlist("default", &["a", "b"], Some(2)));
        let config = ServerConfig {
            auto_end_delay: Duration::from_millis(20),
            ..ServerConfig::default()
        };
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(GameServer::new(rx, Arc::new(store), resolver, config).run());
        tx
    }

    async fn connect(tx: &mpsc::Sender<ServerCommand>) -> (PlayerId, mpsc::Receiver<ServerMessage>) {
        let (sender, rx) = mpsc::channel(64);
        let client_id = PlayerId::new();
        tx.send(ServerCommand::Connect { client_id, sender })
            .await
            .unwrap();
        (client_id, rx)
    }

    /// Skip messages until one matches
    async fn expect<F>(rx: &mut mpsc::Receiver<ServerMessage>, pred: F) -> ServerMessage
    where
        F: Fn(&ServerMessage) -> bool,
    {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timed out waiting for message")
                .expect("channel closed");
            if pred(&msg) {
                return msg;
            }
        }
    }

    async fn create_room(
        tx: &mpsc::Sender<ServerCommand>,
        host: PlayerId,
        rx: &mut mpsc::Receiver<ServerMessage>,
    ) -> String {
        tx.send(ServerCommand::CreateRoom {
            client_id: host,
            nickname: "Host".to_string(),
            settings: None,
        })
        .await
        .unwrap();
        match expect(rx, |m| matches!(m, ServerMessage::RoomCreated { .. })).await {
            ServerMessage::RoomCreated { room } => room.code.0,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_create_and_join() {
        let tx = spawn_server(Arc::new(PlaylistTrackResolver));
        let (host, mut host_rx) = connect(&tx).await;
        let (guest, mut guest_rx) = connect(&tx).await;
        let code = create_room(&tx, host, &mut host_rx).await;

        tx.send(ServerCommand::JoinRoom {
            client_id: guest,
            room_code: code.to_lowercase(),
            nickname: "Guest".to_string(),
        })
        .await
        .unwrap();

        match expect(&mut guest_rx, |m| matches!(m, ServerMessage::RoomJoined { .. })).await {
            ServerMessage::RoomJoined { room } => {
                assert_eq!(room.players.len(), 2);
                assert_eq!(room.host_id, host);
            }
            _ => unreachable!(),
        }
        match expect(&mut host_rx, |m| matches!(m, ServerMessage::PlayerJoined { .. })).await {
            ServerMessage::PlayerJoined { player } => assert_eq!(player.id, guest),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_nickname_reported_to_sender() {
        let tx = spawn_server(Arc::new(PlaylistTrackResolver));
        let (host, mut host_rx) = connect(&tx).await;
        let (guest, mut guest_rx) = connect(&tx).await;
        let code = create_room(&tx, host, &mut host_rx).await;

        tx.send(ServerCommand::JoinRoom {
            client_id: guest,
            room_code: code,
            nickname: "Host".to_string(),
        })
        .await
        .unwrap();

        let msg = expect(&mut guest_rx, |m| matches!(m, ServerMessage::Error { .. })).await;
        assert!(matches!(
            msg,
            ServerMessage::Error {
                code: crate::message::ErrorCode::NicknameTaken,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_full_game_flow() {
        let tx = spawn_server(Arc::new(PlaylistTrackResolver));
        let (host, mut host_rx) = connect(&tx).await;
        let (guest, mut guest_rx) = connect(&tx).await;
        let code = create_room(&tx, host, &mut host_rx).await;
        tx.send(ServerCommand::JoinRoom {
            client_id: guest,
            room_code: code.clone(),
            nickname: "Guest".to_string(),
        })
        .await
        .unwrap();
        expect(&mut guest_rx, |m| matches!(m, ServerMessage::RoomJoined { .. })).await;

        // Only the host may start
        tx.send(ServerCommand::StartGame {
            client_id: guest,
            room_code: code.clone(),
        })
        .await
        .unwrap();
        expect(&mut guest_rx, |m| matches!(m, ServerMessage::Error { .. })).await;

        tx.send(ServerCommand::StartGame {
            client_id: host,
            room_code: code.clone(),
        })
        .await
        .unwrap();
        expect(&mut host_rx, |m| matches!(m, ServerMessage::GameStarted { .. })).await;
        match expect(&mut guest_rx, |m| matches!(m, ServerMessage::PrepareRound { .. })).await {
            ServerMessage::PrepareRound {
                round_number,
                track,
                duration,
            } => {
                assert_eq!(round_number, 1);
                assert_eq!(track.id, "a");
                assert_eq!(duration, 30);
            }
            _ => unreachable!(),
        }

        for id in [host, guest] {
            tx.send(ServerCommand::PlayerReady {
                client_id: id,
                room_code: code.clone(),
            })
            .await
            .unwrap();
        }
        expect(&mut host_rx, |m| matches!(m, ServerMessage::RoundStarted { round_number: 1, .. })).await;
        expect(&mut guest_rx, |m| matches!(m, ServerMessage::RoundStarted { .. })).await;

        tx.send(ServerCommand::SubmitAnswer {
            client_id: host,
            room_code: code.clone(),
            answer: "Song a".to_string(),
        })
        .await
        .unwrap();
        match expect(&mut host_rx, |m| matches!(m, ServerMessage::AnswerResult { .. })).await {
            ServerMessage::AnswerResult { result } => {
                assert!(result.is_correct);
                assert_eq!(result.streak, 1);
                assert!(result.score > 1000);
            }
            _ => unreachable!(),
        }
        match expect(&mut guest_rx, |m| matches!(m, ServerMessage::AnswerSubmitted { .. })).await {
            ServerMessage::AnswerSubmitted { player_id, is_correct, .. } => {
                assert_eq!(player_id, host);
                assert!(is_correct);
            }
            _ => unreachable!(),
        }

        tx.send(ServerCommand::SubmitAnswer {
            client_id: guest,
            room_code: code.clone(),
            answer: "nothing like it".to_string(),
        })
        .await
        .unwrap();

        // Everyone answered: the round ends on its own
        match expect(&mut guest_rx, |m| matches!(m, ServerMessage::RoundEnded { .. })).await {
            ServerMessage::RoundEnded { result } => {
                assert_eq!(result.round_number, 1);
                assert_eq!(result.answers.len(), 2);
                assert_eq!(result.correct_answers.len(), 1);
            }
            _ => unreachable!(),
        }

        // Round two
        tx.send(ServerCommand::NextRound {
            client_id: host,
            room_code: code.clone(),
        })
        .await
        .unwrap();
        expect(&mut host_rx, |m| matches!(m, ServerMessage::PrepareRound { round_number: 2, .. })).await;
        for id in [host, guest] {
            tx.send(ServerCommand::PlayerReady {
                client_id: id,
                room_code: code.clone(),
            })
            .await
            .unwrap();
        }
        expect(&mut host_rx, |m| matches!(m, ServerMessage::RoundStarted { round_number: 2, .. })).await;

        // Next round on the last one ends the live round and the game
        tx.send(ServerCommand::NextRound {
            client_id: host,
            room_code: code.clone(),
        })
        .await
        .unwrap();
        expect(&mut guest_rx, |m| matches!(m, ServerMessage::RoundEnded { .. })).await;
        match expect(&mut guest_rx, |m| matches!(m, ServerMessage::GameEnd { .. })).await {
            ServerMessage::GameEnd { result, forced } => {
                assert!(!forced);
                assert_eq!(result.winner.unwrap().player_id, host);
                assert_eq!(result.final_scores.len(), 2);
            }
            _ => unreachable!(),
        }

        tx.send(ServerCommand::GetHistory { client_id: guest })
            .await
            .unwrap();
        match expect(&mut guest_rx, |m| matches!(m, ServerMessage::History { .. })).await {
            ServerMessage::History { games } => assert_eq!(games.len(), 1),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_track_failure_rolls_back() {
        let tx = spawn_server(Arc::new(FailingResolver));
        let (host, mut host_rx) = connect(&tx).await;
        let code = create_room(&tx, host, &mut host_rx).await;

        tx.send(ServerCommand::StartGame {
            client_id: host,
            room_code: code.clone(),
        })
        .await
        .unwrap();
        let msg = expect(&mut host_rx, |m| matches!(m, ServerMessage::Error { .. })).await;
        assert!(matches!(
            msg,
            ServerMessage::Error {
                code: crate::message::ErrorCode::TrackLoadFailed,
                ..
            }
        ));

        // Room is idle again: settings can change
        tx.send(ServerCommand::UpdateSettings {
            client_id: host,
            room_code: code,
            settings: SettingsUpdate {
                round_interval: Some(10),
                ..Default::default()
            },
        })
        .await
        .unwrap();
        match expect(&mut host_rx, |m| matches!(m, ServerMessage::SettingsUpdated { .. })).await {
            ServerMessage::SettingsUpdated { settings } => assert_eq!(settings.round_interval, 10),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_departure_releases_ready_barrier() {
        let tx = spawn_server(Arc::new(PlaylistTrackResolver));
        let (host, mut host_rx) = connect(&tx).await;
        let (guest, mut guest_rx) = connect(&tx).await;
        let code = create_room(&tx, host, &mut host_rx).await;
        tx.send(ServerCommand::JoinRoom {
            client_id: guest,
            room_code: code.clone(),
            nickname: "Guest".to_string(),
        })
        .await
        .unwrap();
        expect(&mut guest_rx, |m| matches!(m, ServerMessage::RoomJoined { .. })).await;

        tx.send(ServerCommand::StartGame {
            client_id: host,
            room_code: code.clone(),
        })
        .await
        .unwrap();
        expect(&mut host_rx, |m| matches!(m, ServerMessage::PrepareRound { .. })).await;

        tx.send(ServerCommand::PlayerReady {
            client_id: host,
            room_code: code.clone(),
        })
        .await
        .unwrap();
        tx.send(ServerCommand::Disconnect { client_id: guest })
            .await
            .unwrap();

        expect(&mut host_rx, |m| matches!(m, ServerMessage::PlayerLeft { .. })).await;
        expect(&mut host_rx, |m| matches!(m, ServerMessage::RoundStarted { .. })).await;
    }

    #[tokio::test]
    async fn test_host_leaving_promotes_guest() {
        let tx = spawn_server(Arc::new(PlaylistTrackResolver));
        let (host, mut host_rx) = connect(&tx).await;
        let (guest, mut guest_rx) = connect(&tx).await;
        let code = create_room(&tx, host, &mut host_rx).await;
        tx.send(ServerCommand::JoinRoom {
            client_id: guest,
            room_code: code.clone(),
            nickname: "Guest".to_string(),
        })
        .await
        .unwrap();
        expect(&mut guest_rx, |m| matches!(m, ServerMessage::RoomJoined { .. })).await;

        tx.send(ServerCommand::LeaveRoom {
            client_id: host,
            room_code: code,
        })
        .await
        .unwrap();
        expect(&mut host_rx, |m| matches!(m, ServerMessage::Ack { .. })).await;
        match expect(&mut guest_rx, |m| matches!(m, ServerMessage::PlayerLeft { .. })).await {
            ServerMessage::PlayerLeft {
                player_id,
                new_host_id,
                ..
            } => {
                assert_eq!(player_id, host);
                assert_eq!(new_host_id, Some(guest));
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_chat_broadcast() {
        let tx = spawn_server(Arc::new(PlaylistTrackResolver));
        let (host, mut host_rx) = connect(&tx).await;
        let code = create_room(&tx, host, &mut host_rx).await;

        tx.send(ServerCommand::Chat {
            client_id: host,
            room_code: code,
            message: "  hello  ".to_string(),
        })
        .await
        .unwrap();
        match expect(&mut host_rx, |m| matches!(m, ServerMessage::NewMessage { .. })).await {
            ServerMessage::NewMessage { message, nickname, .. } => {
                assert_eq!(message, "hello");
                assert_eq!(nickname, "Host");
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_list_playlists() {
        let tx = spawn_server(Arc::new(PlaylistTrackResolver));
        let (client, mut rx) = connect(&tx).await;
        tx.send(ServerCommand::ListPlaylists { client_id: client })
            .await
            .unwrap();
        match expect(&mut rx, |m| matches!(m, ServerMessage::Playlists { .. })).await {
            ServerMessage::Playlists { playlists } => {
                assert_eq!(playlists.len(), 1);
                assert_eq!(playlists[0].round_count, 2);
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_old_timer_does_not_end_next_round() {
        let mut server = local_server(Arc::new(PlaylistTrackResolver));
        let mut room = live_room(&mut server).await;
        answer_all(&mut server, &room).await;
        assert_eq!(server.pending_auto_end[&room.code].round, 1);

        // Host moves on before the timer fires
        server
            .handle_command(ServerCommand::NextRound {
                client_id: room.host,
                room_code: room.room_code(),
            })
            .await;
        ready_all(&mut server, &room).await;
        assert!(!server.pending_auto_end.contains_key(&room.code));

        next_event(&mut server).await;

        let game = &server.registry.get(&room.code).unwrap().game;
        assert!(game.is_round_active());
        assert_eq!(game.current_round, 2);
        let ended = drain(&mut room.guest_rx)
            .into_iter()
            .filter(|m| matches!(m, ServerMessage::RoundEnded { .. }))
            .count();
        assert_eq!(ended, 1);
    }

    #[tokio::test]
    async fn test_timer_from_previous_game_ignored() {
        let mut server = local_server(Arc::new(PlaylistTrackResolver));
        let room = live_room(&mut server).await;
        answer_all(&mut server, &room).await;
        let stale = server.pending_auto_end[&room.code];

        server
            .handle_command(ServerCommand::EndGame {
                client_id: room.host,
                room_code: room.room_code(),
            })
            .await;
        server
            .handle_command(ServerCommand::StartGame {
                client_id: room.host,
                room_code: room.room_code(),
            })
            .await;
        while server.registry.get(&room.code).unwrap().game.is_loading_tracks() {
            next_event(&mut server).await;
        }
        ready_all(&mut server, &room).await;
        answer_all(&mut server, &room).await;

        // Same room and round number, different game
        let fresh = server.pending_auto_end[&room.code];
        assert_eq!(fresh.round, stale.round);
        assert_ne!(fresh.arm, stale.arm);

        server
            .on_auto_end_round(room.code.clone(), stale.round, stale.arm)
            .await;
        assert!(server.registry.get(&room.code).unwrap().game.is_round_active());
        assert_eq!(server.pending_auto_end.get(&room.code), Some(&fresh));

        while server.registry.get(&room.code).unwrap().game.is_round_active() {
            next_event(&mut server).await;
        }
        assert!(!server.pending_auto_end.contains_key(&room.code));
    }

    #[tokio::test]
    async fn test_forced_end_disarms_timer() {
        let mut server = local_server(Arc::new(PlaylistTrackResolver));
        let mut room = live_room(&mut server).await;
        answer_all(&mut server, &room).await;
        drain(&mut room.guest_rx);

        // Only the host may force the end
        server
            .handle_command(ServerCommand::EndGame {
                client_id: room.guest,
                room_code: room.room_code(),
            })
            .await;
        assert!(has_error(&drain(&mut room.guest_rx), ErrorCode::NotHost));

        server
            .handle_command(ServerCommand::EndGame {
                client_id: room.host,
                room_code: room.room_code(),
            })
            .await;
        let msgs = drain(&mut room.guest_rx);
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMessage::GameEnd { forced: true, .. })));
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMessage::GameEnd { result, .. } if result.total_rounds == 2)));
        assert!(matches!(
            drain(&mut room.host_rx).last(),
            Some(ServerMessage::GameEnd { forced: true, .. })
        ));
        assert!(!server.pending_auto_end.contains_key(&room.code));
        assert_eq!(server.engine.game_history().len(), 1);

        next_event(&mut server).await;

        assert!(!server.registry.get(&room.code).unwrap().game.is_playing);
        assert!(!drain(&mut room.guest_rx)
            .iter()
            .any(|m| matches!(m, ServerMessage::RoundEnded { .. })));
    }

    #[tokio::test]
    async fn test_commands_rejected_while_tracks_load() {
        let mut server = local_server(Arc::new(PlaylistTrackResolver));
        let mut room = loading_room(&mut server).await;
        drain(&mut room.host_rx);

        server
            .handle_command(ServerCommand::PlayerReady {
                client_id: room.host,
                room_code: room.room_code(),
            })
            .await;
        assert!(has_error(&drain(&mut room.host_rx), ErrorCode::TracksLoading));

        server
            .handle_command(ServerCommand::NextRound {
                client_id: room.host,
                room_code: room.room_code(),
            })
            .await;
        assert!(has_error(&drain(&mut room.host_rx), ErrorCode::TracksLoading));

        next_event(&mut server).await;
        let msgs = drain(&mut room.host_rx);
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMessage::PrepareRound { round_number: 1, .. })));
    }

    #[tokio::test]
    async fn test_resolution_after_forced_end_ignored() {
        let mut server = local_server(Arc::new(PlaylistTrackResolver));
        let mut room = loading_room(&mut server).await;

        server
            .handle_command(ServerCommand::EndGame {
                client_id: room.host,
                room_code: room.room_code(),
            })
            .await;
        assert!(!server.registry.get(&room.code).unwrap().game.is_playing);

        // Restart before the first resolution arrives
        server
            .handle_command(ServerCommand::StartGame {
                client_id: room.host,
                room_code: room.room_code(),
            })
            .await;
        next_event(&mut server).await;
        next_event(&mut server).await;

        let msgs = drain(&mut room.guest_rx);
        let started = msgs
            .iter()
            .filter(|m| matches!(m, ServerMessage::GameStarted { .. }))
            .count();
        assert_eq!(started, 1);
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMessage::GameEnd { forced: true, .. })));

        let game = &server.registry.get(&room.code).unwrap().game;
        assert!(game.is_playing);
        assert!(!game.is_loading_tracks());
        assert!(server.pending_starts.is_empty());
    }

    #[tokio::test]
    async fn test_resolver_panic_rolls_back() {
        let mut server = local_server(Arc::new(PanickingResolver));
        let mut room = loading_room(&mut server).await;

        next_event(&mut server).await;
        assert!(has_error(&drain(&mut room.host_rx), ErrorCode::TrackLoadFailed));
        assert!(!server.registry.get(&room.code).unwrap().game.is_playing);

        // The host can retry instead of getting AlreadyPlaying
        server
            .handle_command(ServerCommand::StartGame {
                client_id: room.host,
                room_code: room.room_code(),
            })
            .await;
        next_event(&mut server).await;
        let msgs = drain(&mut room.host_rx);
        assert!(!has_error(&msgs, ErrorCode::AlreadyPlaying));
        assert!(has_error(&msgs, ErrorCode::TrackLoadFailed));
        assert!(drain(&mut room.guest_rx)
            .iter()
            .all(|m| !matches!(m, ServerMessage::Error { .. })));
    }

    #[tokio::test]
    async fn test_resolver_timeout_rolls_back() {
        let mut server = local_server(Arc::new(HangingResolver));
        let mut room = loading_room(&mut server).await;

        next_event(&mut server).await;
        assert!(has_error(&drain(&mut room.host_rx), ErrorCode::TrackLoadFailed));
        let game = &server.registry.get(&room.code).unwrap().game;
        assert!(!game.is_playing);
        assert!(!game.is_loading_tracks());
    }
}
