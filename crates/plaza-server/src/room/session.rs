//! Per-participant registry entry and its lifecycle.

use std::sync::Arc;

use plaza_core::{Position, SessionId, UserSnapshot};

use crate::websocket::connection::ClientConnection;

/// Lifecycle of a session from the room's point of view.
///
/// `Connecting → Active → Closed`. `Closed` is terminal; a reconnect is a
/// brand-new session with a new id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Channel upgraded, not yet registered.
    Connecting,
    /// Registered and receiving broadcasts.
    Active,
    /// Removed from the room.
    Closed,
}

impl SessionState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Active) | (Self::Connecting | Self::Active, Self::Closed)
        )
    }
}

/// One registered participant.
#[derive(Debug)]
pub struct Session {
    connection: Arc<ClientConnection>,
    position: Position,
    joined_seq: u64,
}

impl Session {
    pub(crate) fn new(connection: Arc<ClientConnection>, position: Position, joined_seq: u64) -> Self {
        Self {
            connection,
            position,
            joined_seq,
        }
    }

    /// Participant id.
    pub fn id(&self) -> &SessionId {
        &self.connection.id
    }

    /// Outbound handle.
    pub fn connection(&self) -> &Arc<ClientConnection> {
        &self.connection
    }

    /// Last reported position.
    pub fn position(&self) -> Position {
        self.position
    }

    pub(crate) fn set_position(&mut self, position: Position) {
        self.position = position;
    }

    /// Monotonic join order within the room.
    pub fn joined_seq(&self) -> u64 {
        self.joined_seq
    }

    /// Wire view of this participant.
    pub fn snapshot(&self) -> UserSnapshot {
        UserSnapshot {
            id: self.id().clone(),
            x: self.position.x,
            y: self.position.y,
        }
    }
}
