//! Client struct definition
//!
//! Represents a connected session with its outbound channel and the room it
//! currently belongs to.

use tokio::sync::mpsc;

use crate::error::SendError;
use crate::message::ServerMessage;
use crate::types::{PlayerId, RoomCode};

/// Connected client information
#[derive(Debug)]
pub struct Client {
    /// Session id, also the player id inside a room
    pub id: PlayerId,
    /// Server → Client message channel
    pub sender: mpsc::Sender<ServerMessage>,
    /// Room this client has created or joined
    pub room: Option<RoomCode>,
}

impl Client {
    /// Create a new client with the given ID and sender channel
    pub fn new(id: PlayerId, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id,
            sender,
            room: None,
        }
    }

    /// Send a message to this client
    ///
    /// Returns an error if the channel is closed (client disconnected).
    pub async fn send(&self, msg: ServerMessage) -> Result<(), SendError> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| SendError::ChannelClosed)
    }

    pub fn is_in_room(&self) -> bool {
        self.room.is_some()
    }

    /// Check the client is in the given room
    pub fn is_in(&self, code: &RoomCode) -> bool {
        self.room.as_ref() == Some(code)
    }
}
