//! Session lifecycle state
//!
//! A single state machine guards the dual-capture session. All lifecycle
//! flags live together behind one lock so that concurrent enable, start,
//! and stop calls observe a consistent picture.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Current state of the dual-capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session exists
    Idle,
    /// Configuration transaction in progress
    Configuring,
    /// Sources attached, streams running, no recording
    Ready,
    /// Streams running with an active recording
    Running,
    /// Teardown in progress
    Stopping,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Idle
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session is {0:?}, expected {1:?}")]
    InvalidState(SessionState, SessionState),

    #[error("session is not ready")]
    NotReady,

    #[error("a recording is already in progress")]
    AlreadyRecording,

    #[error("no recording in progress")]
    NotRecording,

    #[error("session channel closed")]
    ChannelClosed,
}

#[derive(Debug, Default)]
struct Lifecycle {
    state: SessionState,
}

/// Shared handle to the session's lifecycle state.
#[derive(Debug, Clone, Default)]
pub struct SharedLifecycle {
    inner: Arc<Mutex<Lifecycle>>,
}

impl SharedLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Enter the configuration transaction. Only valid from `Idle`.
    pub fn begin_configuring(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock();
        match inner.state {
            SessionState::Idle => {
                inner.state = SessionState::Configuring;
                Ok(())
            }
            other => Err(SessionError::InvalidState(other, SessionState::Idle)),
        }
    }

    /// Commit or roll back the configuration transaction.
    pub fn finish_configuring(&self, success: bool) {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Configuring {
            inner.state = if success {
                SessionState::Ready
            } else {
                SessionState::Idle
            };
        }
    }

    /// Move into the recording state. Only valid from `Ready`.
    pub fn begin_running(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock();
        match inner.state {
            SessionState::Ready => {
                inner.state = SessionState::Running;
                Ok(())
            }
            SessionState::Running => Err(SessionError::AlreadyRecording),
            other => Err(SessionError::InvalidState(other, SessionState::Ready)),
        }
    }

    /// Leave the recording state, back to `Ready`.
    ///
    /// Returns whether a recording was actually in progress, so two racing
    /// stop paths resolve to exactly one finalization.
    pub fn end_running(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Running {
            inner.state = SessionState::Ready;
            true
        } else {
            false
        }
    }

    /// Enter teardown from any active state.
    pub fn begin_stopping(&self) {
        self.inner.lock().state = SessionState::Stopping;
    }

    pub fn to_idle(&self) {
        self.inner.lock().state = SessionState::Idle;
    }

    pub fn is_configuring(&self) -> bool {
        self.state() == SessionState::Configuring
    }

    /// Whether streams are live, recording or not.
    pub fn is_active(&self) -> bool {
        matches!(self.state(), SessionState::Ready | SessionState::Running)
    }

    pub fn is_recording(&self) -> bool {
        self.state() == SessionState::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let lc = SharedLifecycle::new();
        assert_eq!(lc.state(), SessionState::Idle);

        lc.begin_configuring().unwrap();
        assert!(lc.is_configuring());

        lc.finish_configuring(true);
        assert_eq!(lc.state(), SessionState::Ready);
        assert!(lc.is_active());
        assert!(!lc.is_recording());

        lc.begin_running().unwrap();
        assert!(lc.is_recording());

        assert!(lc.end_running());
        assert_eq!(lc.state(), SessionState::Ready);

        lc.begin_stopping();
        assert_eq!(lc.state(), SessionState::Stopping);
        lc.to_idle();
        assert_eq!(lc.state(), SessionState::Idle);
    }

    #[test]
    fn test_failed_configuration_rolls_back() {
        let lc = SharedLifecycle::new();
        lc.begin_configuring().unwrap();
        lc.finish_configuring(false);
        assert_eq!(lc.state(), SessionState::Idle);
    }

    #[test]
    fn test_cannot_configure_twice() {
        let lc = SharedLifecycle::new();
        lc.begin_configuring().unwrap();
        assert!(lc.begin_configuring().is_err());
    }

    #[test]
    fn test_cannot_record_unless_ready() {
        let lc = SharedLifecycle::new();
        assert!(lc.begin_running().is_err());

        lc.begin_configuring().unwrap();
        assert!(lc.begin_running().is_err());

        lc.finish_configuring(true);
        lc.begin_running().unwrap();
        assert!(matches!(
            lc.begin_running(),
            Err(SessionError::AlreadyRecording)
        ));
    }

    #[test]
    fn test_end_running_resolves_exactly_once() {
        let lc = SharedLifecycle::new();
        lc.begin_configuring().unwrap();
        lc.finish_configuring(true);
        lc.begin_running().unwrap();

        assert!(lc.end_running());
        assert!(!lc.end_running());
    }
}
