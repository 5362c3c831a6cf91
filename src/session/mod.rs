//! Dual-capture session module
//!
//! - `state`: the session lifecycle state machine
//! - `pairing`: the two-stream frame pairing buffer
//! - `manager`: source ownership and the frame router task

pub mod manager;
pub mod pairing;
pub mod state;

pub use manager::DualSessionManager;
pub use state::{SessionError, SessionState, SharedLifecycle};
