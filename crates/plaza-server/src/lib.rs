//! # plaza-server
//!
//! Axum HTTP + WebSocket server for a single shared room.
//!
//! - **Room**: session registry, atomic join handshake, relay, and fan-out
//!   that isolates per-recipient send failures
//! - **WebSocket**: per-connection bounded outbound queue, writer task,
//!   heartbeat, and exactly-once room disconnect
//! - **Origin policy**: allow-list enforced as middleware ahead of every route
//! - **Shutdown**: cancellation token plus tracked session tasks

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod origin;
pub mod room;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::ServerError;
pub use origin::OriginPolicy;
pub use room::{BroadcastReport, Dispatch, Room};
pub use server::PlazaServer;
