pub mod actor;
pub mod frames;
pub mod handler;
pub mod protocol;
pub mod registry;

use axum::extract::ws::Message;
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::HubError;
use crate::ws::frames::ServerFrame;

pub use registry::ConnectionRegistry;

/// Sender half of a connection's outbound channel. The connection's writer
/// task owns the socket sink and drains the matching receiver.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;

/// Identity of one live WebSocket, distinct from the user behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Cloneable handle used to push frames to one connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: ConnectionSender,
}

impl ConnectionHandle {
    pub fn new(tx: ConnectionSender) -> Self {
        Self {
            id: ConnectionId::new(),
            tx,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a raw message for the writer task.
    pub fn send(&self, msg: Message) -> Result<(), HubError> {
        self.tx
            .send(msg)
            .map_err(|_| HubError::Transport(format!("connection {} is closed", self.id)))
    }

    pub fn send_frame(&self, frame: &ServerFrame) -> Result<(), HubError> {
        self.send(frame.to_message()?)
    }
}
