//! # plaza-client
//!
//! Client side of the plaza room.
//!
//! - [`PlazaClient`]: one WebSocket session with `send`, `subscribe`, and
//!   connection state
//! - [`World`]: local cache of everyone's avatar and the chat log, plus
//!   keyboard-style movement stepping clamped to the canvas

#![deny(unsafe_code)]

pub mod client;
pub mod errors;
pub mod world;

pub use client::{Listener, PlazaClient, Subscription};
pub use errors::ClientError;
pub use world::{Avatar, ChatLine, MoveInput, World};
