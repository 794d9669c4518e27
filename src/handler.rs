//! WebSocket connection handler
//!
//! Handles individual client connections: WebSocket handshake,
//! message parsing, and bidirectional communication with the GameServer.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::message::{ClientMessage, ServerMessage};
use crate::server::ServerCommand;
use crate::types::PlayerId;

/// Outbound buffer per connection
const CLIENT_BUFFER_SIZE: usize = 64;

/// Handle a new TCP connection
///
/// Performs WebSocket handshake, sets up bidirectional communication,
/// and manages the connection lifecycle.
pub async fn handle_connection(
    stream: TcpStream,
    cmd_tx: mpsc::Sender<ServerCommand>,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    // WebSocket handshake
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let client_id = PlayerId::new();
    info!("Client {} connected from {}", client_id, peer_addr);

    // Create channel for server -> client messages
    let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(CLIENT_BUFFER_SIZE);
    // Parse errors are answered from the read task directly
    let error_tx = msg_tx.clone();

    // Register with GameServer
    if cmd_tx
        .send(ServerCommand::Connect {
            client_id,
            sender: msg_tx,
        })
        .await
        .is_err()
    {
        error!("Failed to register client {} - server closed", client_id);
        return Err(AppError::ChannelSend);
    }

    let connected_msg = ServerMessage::Connected {
        player_id: client_id,
    };
    let json = serde_json::to_string(&connected_msg)?;
    ws_sender.send(Message::Text(json.into())).await?;

    let cmd_tx_read = cmd_tx.clone();

    // Spawn read task (WebSocket -> ServerCommand)
    let read_task = tokio::spawn(async move {
        while let Some(msg_result) = ws_receiver.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(client_msg) => {
                        let cmd = client_message_to_command(client_id, client_msg);
                        if cmd_tx_read.send(cmd).await.is_err() {
                            debug!("Server closed, ending read task for {}", client_id);
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Invalid JSON from {}: {}", client_id, e);
                        if error_tx.send(AppError::Json(e).into()).await.is_err() {
                            break;
                        }
                    }
                },
                Ok(Message::Close(_)) => {
                    debug!("Client {} sent close frame", client_id);
                    break;
                }
                Ok(Message::Ping(_)) => {
                    // Pong is handled automatically by tungstenite
                    debug!("Ping from {}", client_id);
                }
                Ok(_) => {
                    // Binary, pong and raw frames are ignored
                }
                Err(e) => {
                    error!("WebSocket error for {}: {}", client_id, e);
                    break;
                }
            }
        }
        debug!("Read task ended for {}", client_id);
    });

    // Spawn write task (ServerMessage -> WebSocket)
    let write_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        debug!("WebSocket send failed, ending write task");
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                }
            }
        }
        debug!("Write task ended for client");

        let _ = ws_sender.close().await;
    });

    // Wait for either task to complete
    tokio::select! {
        _ = read_task => {
            debug!("Read task completed for {}", client_id);
        }
        _ = write_task => {
            debug!("Write task completed for {}", client_id);
        }
    }

    // A dropped connection counts as leaving the room
    let _ = cmd_tx
        .send(ServerCommand::Disconnect { client_id })
        .await;

    info!("Client {} disconnected", client_id);

    Ok(())
}

/// Convert a ClientMessage to a ServerCommand
fn client_message_to_command(client_id: PlayerId, msg: ClientMessage) -> ServerCommand {
    match msg {
        ClientMessage::CreateRoom { nickname, settings } => ServerCommand::CreateRoom {
            client_id,
            nickname,
            settings,
        },
        ClientMessage::JoinRoom { code, nickname } => ServerCommand::JoinRoom {
            client_id,
            room_code: code,
            nickname,
        },
        ClientMessage::LeaveRoom { code } => ServerCommand::LeaveRoom {
            client_id,
            room_code: code,
        },
        ClientMessage::UpdateSettings { code, settings } => ServerCommand::UpdateSettings {
            client_id,
            room_code: code,
            settings,
        },
        ClientMessage::StartGame { room_code } => ServerCommand::StartGame {
            client_id,
            room_code,
        },
        ClientMessage::PlayerReady { room_code } => ServerCommand::PlayerReady {
            client_id,
            room_code,
        },
        ClientMessage::SubmitAnswer { room_code, answer } => ServerCommand::SubmitAnswer {
            client_id,
            room_code,
            answer,
        },
        ClientMessage::NextRound { room_code } => ServerCommand::NextRound {
            client_id,
            room_code,
        },
        ClientMessage::GameEnd { room_code } => ServerCommand::EndGame {
            client_id,
            room_code,
        },
        ClientMessage::SendMessage { room_code, message } => ServerCommand::Chat {
            client_id,
            room_code,
            message,
        },
        ClientMessage::ListPlaylists => ServerCommand::ListPlaylists { client_id },
        ClientMessage::GetHistory => ServerCommand::GetHistory { client_id },
    }
}
