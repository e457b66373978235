//! Message types sent from the session to whoever drives it

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::time::Duration;
use tracing::trace;

use crate::shared::SessionState;
use crate::vision::DispatchOutcome;

/// How long an error notice stays visible
pub const ERROR_NOTICE_DURATION: Duration = Duration::from_secs(5);

/// How long an informational notice stays visible
pub const INFO_NOTICE_DURATION: Duration = Duration::from_secs(2);

/// Events are dropped once this many are waiting unread
const EVENT_BACKLOG: usize = 1024;

/// Severity of a user-facing notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A transient message meant to be shown to the user for a while
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    /// How long the notice should stay on screen
    pub duration: Duration,
}

impl Notice {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
            duration: ERROR_NOTICE_DURATION,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
            duration: INFO_NOTICE_DURATION,
        }
    }
}

/// Messages sent from the session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session moved between lifecycle states
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// Something the user should see briefly
    Notice(Notice),
    /// A recognition pass finished, was dropped, or failed
    DispatchCompleted(DispatchOutcome),
}

/// Sending half of the session event channel
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: Sender<SessionEvent>,
}

impl Notifier {
    /// Create a notifier and the receiver that drains it
    pub fn channel() -> (Self, Receiver<SessionEvent>) {
        let (tx, rx) = bounded(EVENT_BACKLOG);
        (Self { tx }, rx)
    }

    /// Publish an event without blocking; events are dropped if nobody keeps up
    pub fn emit(&self, event: SessionEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => trace!("Event backlog full, dropping {:?}", event),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    pub fn notice(&self, notice: Notice) {
        self.emit(SessionEvent::Notice(notice));
    }
}
