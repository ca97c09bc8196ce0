//! # plaza-core
//!
//! Shared vocabulary for the plaza room server and its clients.
//!
//! - **Branded IDs**: [`SessionId`] as a newtype so participant ids are never
//!   confused with arbitrary strings
//! - **Protocol**: the closed [`ClientMessage`] / [`ServerMessage`] tagged
//!   enums that travel as one JSON object per WebSocket message
//! - **Errors**: [`ProtocolError`] for payloads that fail to decode
//! - **Logging**: `tracing` subscriber bootstrap and in-memory log capture

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod protocol;

pub use errors::ProtocolError;
pub use ids::SessionId;
pub use protocol::{ClientMessage, Position, ServerMessage, UserSnapshot, SPAWN_POINT};
