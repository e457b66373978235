//! Session lifecycle state shared between the controller, the scheduler and in-flight dispatches

use std::fmt;

/// Lifecycle state of the scanning session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Created, nothing acquired yet
    #[default]
    Idle,
    /// Capture and worker pool initialization in progress
    Starting,
    /// Scheduler active
    Scanning,
    /// Scheduler halted, capture and worker pool retained
    Paused,
    /// Capture released, worker pool terminated
    Stopped,
}

impl SessionState {
    /// Get the display name for this state
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Scanning => "scanning",
            SessionState::Paused => "paused",
            SessionState::Stopped => "stopped",
        }
    }

    /// Whether `start` may be issued from this state
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Stopped | SessionState::Paused
        )
    }

    /// Whether recognition results arriving now should still update the output
    pub fn accepts_results(&self) -> bool {
        matches!(self, SessionState::Scanning | SessionState::Paused)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
