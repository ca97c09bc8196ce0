//! Wire protocol: one JSON object per WebSocket message, discriminated by `type`.
//!
//! Both directions are closed enums. Anything that does not decode into a
//! known variant is rejected with a [`ProtocolError`] instead of being relayed
//! with an unknown shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ProtocolError;
use crate::ids::SessionId;

/// Where every new session appears.
pub const SPAWN_POINT: Position = Position { x: 400.0, y: 300.0 };

/// A point on the shared canvas.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate.
    pub y: f64,
}

impl Position {
    /// Create a position.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl Default for Position {
    fn default() -> Self {
        SPAWN_POINT
    }
}

/// Another participant as listed in an `init` event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserSnapshot {
    /// Participant id.
    pub id: SessionId,
    /// Last known horizontal coordinate.
    pub x: f64,
    /// Last known vertical coordinate.
    pub y: f64,
}

impl UserSnapshot {
    /// Last known position as a [`Position`].
    #[must_use]
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }
}

/// Events a client may send. Any `userId` a client attaches is ignored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// The sender's avatar moved.
    Move {
        /// New horizontal coordinate.
        x: f64,
        /// New vertical coordinate.
        y: f64,
    },
    /// The sender said something.
    Chat {
        /// Message text.
        message: String,
    },
}

impl ClientMessage {
    /// Decode a raw inbound payload.
    ///
    /// Unknown `type` values and missing or mistyped fields are errors.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(raw).map_err(ProtocolError::InvalidJson)?;
        let Some(object) = value.as_object() else {
            return Err(ProtocolError::NotAnObject);
        };
        let kind = match object.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            Some(_) | None => return Err(ProtocolError::MissingType),
        };
        if !matches!(kind.as_str(), "move" | "chat") {
            return Err(ProtocolError::UnknownType(kind));
        }
        serde_json::from_value(value).map_err(|source| ProtocolError::InvalidFields { kind, source })
    }

    /// Serialize for the wire.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// The `type` discriminator.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Move { .. } => "move",
            Self::Chat { .. } => "chat",
        }
    }

    /// Attach the sender's identity, producing the event other participants see.
    #[must_use]
    pub fn stamp(self, user_id: SessionId) -> ServerMessage {
        match self {
            Self::Move { x, y } => ServerMessage::Move { user_id, x, y },
            Self::Chat { message } => ServerMessage::Chat { user_id, message },
        }
    }
}

/// Events the room sends to clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Sent once, only to a newly connected session.
    Init {
        /// The id the room assigned to this session.
        user_id: SessionId,
        /// Own spawn horizontal coordinate.
        x: f64,
        /// Own spawn vertical coordinate.
        y: f64,
        /// Everyone else already present, in join order.
        users: Vec<UserSnapshot>,
    },
    /// A new participant entered.
    Join {
        /// The newcomer.
        user_id: SessionId,
        /// Spawn horizontal coordinate.
        x: f64,
        /// Spawn vertical coordinate.
        y: f64,
    },
    /// A participant disconnected.
    Leave {
        /// The participant that left.
        user_id: SessionId,
    },
    /// A participant's position changed.
    Move {
        /// The participant that moved.
        user_id: SessionId,
        /// New horizontal coordinate.
        x: f64,
        /// New vertical coordinate.
        y: f64,
    },
    /// A participant sent a text message.
    Chat {
        /// The speaker.
        user_id: SessionId,
        /// Message text.
        message: String,
    },
}

impl ServerMessage {
    /// Decode a server event (client side).
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(ProtocolError::InvalidJson)
    }

    /// Serialize for the wire.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// The `type` discriminator.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::Join { .. } => "join",
            Self::Leave { .. } => "leave",
            Self::Move { .. } => "move",
            Self::Chat { .. } => "chat",
        }
    }

    /// The participant this event is about.
    #[must_use]
    pub fn user_id(&self) -> &SessionId {
        match self {
            Self::Init { user_id, .. }
            | Self::Join { user_id, .. }
            | Self::Leave { user_id }
            | Self::Move { user_id, .. }
            | Self::Chat { user_id, .. } => user_id,
        }
    }
}
