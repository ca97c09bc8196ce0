//! Local render state: who is where, what was said, and own movement.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use plaza_core::{ClientMessage, Position, ServerMessage, SessionId, SPAWN_POINT};

/// Canvas width in world units.
pub const CANVAS_WIDTH: f64 = 800.0;
/// Canvas height in world units.
pub const CANVAS_HEIGHT: f64 = 600.0;
/// Avatar edge length; positions are the avatar's top-left corner.
pub const AVATAR_SIZE: f64 = 30.0;
/// Distance moved per axis per tick.
pub const MOVE_SPEED: f64 = 5.0;
/// Chat lines kept before the oldest is dropped.
pub const CHAT_HISTORY: usize = 100;

/// Avatar fill colours, picked by [`avatar_color`].
pub const PALETTE: [&str; 10] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#FFA07A", "#98D8C8", "#F7DC6F", "#BB8FCE", "#85C1E2",
    "#F8B195", "#C06C84",
];

/// Stable colour for a participant: sum of UTF-16 code units modulo the palette.
pub fn avatar_color(id: &SessionId) -> &'static str {
    let hash: usize = id.as_str().encode_utf16().map(usize::from).sum();
    PALETTE[hash % PALETTE.len()]
}

/// Short label shown above an avatar.
pub fn display_name(id: &SessionId) -> String {
    let prefix: String = id.as_str().chars().take(4).collect();
    format!("User {prefix}")
}

/// Keep an avatar fully inside the canvas.
pub fn clamp(position: Position) -> Position {
    Position::new(
        position.x.clamp(0.0, CANVAS_WIDTH - AVATAR_SIZE),
        position.y.clamp(0.0, CANVAS_HEIGHT - AVATAR_SIZE),
    )
}

/// Another participant as drawn locally.
#[derive(Clone, Debug, PartialEq)]
pub struct Avatar {
    /// Participant id.
    pub id: SessionId,
    /// Last known position.
    pub position: Position,
}

impl Avatar {
    /// Label for this avatar.
    pub fn name(&self) -> String {
        display_name(&self.id)
    }

    /// Fill colour for this avatar.
    pub fn color(&self) -> &'static str {
        avatar_color(&self.id)
    }
}

/// One received chat message.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatLine {
    /// Speaker.
    pub user_id: SessionId,
    /// Text.
    pub message: String,
    /// Local receive time.
    pub received_at: DateTime<Utc>,
}

/// Directions held down during one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MoveInput {
    /// Towards y = 0.
    pub up: bool,
    /// Towards larger y.
    pub down: bool,
    /// Towards x = 0.
    pub left: bool,
    /// Towards larger x.
    pub right: bool,
}

impl MoveInput {
    /// Build from pressed key names (`w`/`a`/`s`/`d` or `ArrowUp` etc.,
    /// case-insensitive). Unknown keys are ignored.
    pub fn from_keys<'a>(keys: impl IntoIterator<Item = &'a str>) -> Self {
        let mut input = Self::default();
        for key in keys {
            match key.to_ascii_lowercase().as_str() {
                "w" | "arrowup" => input.up = true,
                "s" | "arrowdown" => input.down = true,
                "a" | "arrowleft" => input.left = true,
                "d" | "arrowright" => input.right = true,
                _ => {}
            }
        }
        input
    }

    fn delta(self) -> (f64, f64) {
        let axis = |neg: bool, pos: bool| match (neg, pos) {
            (true, false) => -MOVE_SPEED,
            (false, true) => MOVE_SPEED,
            _ => 0.0,
        };
        (axis(self.left, self.right), axis(self.up, self.down))
    }
}

/// Client-side cache of the room.
#[derive(Clone, Debug)]
pub struct World {
    me: Option<SessionId>,
    position: Position,
    others: Vec<Avatar>,
    chat: VecDeque<ChatLine>,
}

impl World {
    /// Empty world with the own avatar at the spawn point.
    pub fn new() -> Self {
        Self {
            me: None,
            position: SPAWN_POINT,
            others: Vec::new(),
            chat: VecDeque::new(),
        }
    }

    /// Fold one server event into the cache. Returns whether anything changed.
    ///
    /// The own id never appears among [`others`](Self::others); a `move` for
    /// an unknown participant is ignored.
    pub fn apply(&mut self, event: &ServerMessage) -> bool {
        match event {
            ServerMessage::Init { user_id, x, y, users } => {
                self.me = Some(user_id.clone());
                self.position = clamp(Position::new(*x, *y));
                self.others = users
                    .iter()
                    .filter(|u| &u.id != user_id)
                    .map(|u| Avatar {
                        id: u.id.clone(),
                        position: u.position(),
                    })
                    .collect();
                true
            }
            ServerMessage::Join { user_id, x, y } => {
                if self.is_me(user_id) || self.avatar(user_id).is_some() {
                    return false;
                }
                self.others.push(Avatar {
                    id: user_id.clone(),
                    position: Position::new(*x, *y),
                });
                true
            }
            ServerMessage::Leave { user_id } => {
                let before = self.others.len();
                self.others.retain(|a| &a.id != user_id);
                self.others.len() != before
            }
            ServerMessage::Move { user_id, x, y } => {
                match self.others.iter_mut().find(|a| &a.id == user_id) {
                    Some(avatar) => {
                        avatar.position = Position::new(*x, *y);
                        true
                    }
                    None => false,
                }
            }
            ServerMessage::Chat { user_id, message } => {
                if self.chat.len() == CHAT_HISTORY {
                    let _ = self.chat.pop_front();
                }
                self.chat.push_back(ChatLine {
                    user_id: user_id.clone(),
                    message: message.clone(),
                    received_at: Utc::now(),
                });
                true
            }
        }
    }

    /// Advance the own avatar by one tick of `input`.
    ///
    /// Returns the `move` to send when the clamped position changed.
    pub fn step(&mut self, input: MoveInput) -> Option<ClientMessage> {
        let (dx, dy) = input.delta();
        if dx == 0.0 && dy == 0.0 {
            return None;
        }
        let next = clamp(Position::new(self.position.x + dx, self.position.y + dy));
        if next == self.position {
            return None;
        }
        self.position = next;
        Some(ClientMessage::Move {
            x: next.x,
            y: next.y,
        })
    }

    /// Record a locally sent chat line (the room does not echo it back).
    pub fn record_own_chat(&mut self, message: impl Into<String>) {
        if let Some(me) = self.me.clone() {
            let _ = self.apply(&ServerMessage::Chat {
                user_id: me,
                message: message.into(),
            });
        }
    }

    /// Own id once `init` arrived.
    pub fn my_id(&self) -> Option<&SessionId> {
        self.me.as_ref()
    }

    /// Own avatar position.
    pub fn position(&self) -> Position {
        self.position
    }

    /// Everyone else, in the order they became known.
    pub fn others(&self) -> &[Avatar] {
        &self.others
    }

    /// Look up another participant.
    pub fn avatar(&self, id: &SessionId) -> Option<&Avatar> {
        self.others.iter().find(|a| &a.id == id)
    }

    /// Chat history, oldest first.
    pub fn chat(&self) -> impl Iterator<Item = &ChatLine> {
        self.chat.iter()
    }

    fn is_me(&self, id: &SessionId) -> bool {
        self.me.as_ref() == Some(id)
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}
