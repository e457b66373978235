//! Shared state and messaging between the session and its callers
//!
//! Lifecycle state is published to the scheduler and to in-flight
//! recognition passes; events and notices flow out to the front end.

pub mod state;
pub mod messages;

pub use state::SessionState;
pub use messages::{Notice, NoticeLevel, Notifier, SessionEvent};
