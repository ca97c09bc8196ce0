//! WebSocket transport: per-connection queue handle, liveness, and session task.

pub mod connection;
pub mod heartbeat;
pub mod session;
