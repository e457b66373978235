//! Scanning Layer
//!
//! The session state machine and the per-frame scheduler it drives.

pub mod refresh;
pub mod scheduler;
pub mod session;

pub use refresh::{DisplayRefresh, RefreshSource};
pub use session::{Reconfigure, Session, SessionOptions};
