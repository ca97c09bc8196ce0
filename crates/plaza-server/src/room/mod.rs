//! The shared room and its session registry.

pub mod coordinator;
pub mod session;

pub use coordinator::{BroadcastReport, Dispatch, Room};
pub use session::{Session, SessionState};
