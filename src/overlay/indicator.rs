//! Status indicator shown on the ROI overlay border

use std::fmt;

/// Outcome of the most recent aggregation, as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Indicator {
    /// No decision since the last reset
    #[default]
    Idle,
    /// Last pass produced accepted text
    Accepted,
    /// Last pass was below threshold, empty, or failed
    Rejected,
}

impl Indicator {
    /// Border colour as a CSS hex string
    pub fn color_hex(&self) -> &'static str {
        match self {
            Indicator::Idle => "#00b4d8",
            Indicator::Accepted => "#2cb67d",
            Indicator::Rejected => "#d00000",
        }
    }

    /// Border colour as RGB components
    pub fn color_rgb(&self) -> [u8; 3] {
        match self {
            Indicator::Idle => [0x00, 0xb4, 0xd8],
            Indicator::Accepted => [0x2c, 0xb6, 0x7d],
            Indicator::Rejected => [0xd0, 0x00, 0x00],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Indicator::Idle => "idle",
            Indicator::Accepted => "accepted",
            Indicator::Rejected => "rejected",
        }
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
