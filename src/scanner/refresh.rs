//! Display refresh signal driving the scan scheduler

use async_trait::async_trait;
use tokio::time::{Duration, Interval, MissedTickBehavior};

use crate::error::{Result, ScanError};

/// Resolves once per display frame
#[async_trait]
pub trait RefreshSignal: Send {
    async fn next_frame(&mut self);
}

/// Hands out refresh signals, one per scheduler run
pub trait RefreshSource: Send + Sync {
    /// Must be called from within the runtime
    fn subscribe(&self) -> Box<dyn RefreshSignal>;

    /// Nominal frames per second
    fn rate_hz(&self) -> f64;
}

/// Timer-backed refresh at a fixed rate
#[derive(Debug, Clone, Copy)]
pub struct DisplayRefresh {
    rate_hz: f64,
    period: Duration,
}

impl DisplayRefresh {
    /// Fails unless the rate gives a frame period between one nanosecond and `Duration::MAX`
    pub fn new(rate_hz: f64) -> Result<Self> {
        if !rate_hz.is_finite() || rate_hz <= 0.0 {
            return Err(ScanError::config(format!(
                "refresh rate must be a positive number of Hz, got {}",
                rate_hz
            )));
        }
        let period = Duration::try_from_secs_f64(1.0 / rate_hz)
            .ok()
            .filter(|period| !period.is_zero())
            .ok_or_else(|| {
                ScanError::config(format!("refresh rate {} Hz is out of range", rate_hz))
            })?;
        Ok(Self { rate_hz, period })
    }

    /// Time between two frames
    pub fn period(&self) -> Duration {
        self.period
    }
}

impl RefreshSource for DisplayRefresh {
    fn subscribe(&self) -> Box<dyn RefreshSignal> {
        let mut ticker = tokio::time::interval(self.period);
        // A late frame is simply missed, as on a real display
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Box::new(TickerSignal { ticker })
    }

    fn rate_hz(&self) -> f64 {
        self.rate_hz
    }
}

struct TickerSignal {
    ticker: Interval,
}

#[async_trait]
impl RefreshSignal for TickerSignal {
    async fn next_frame(&mut self) {
        self.ticker.tick().await;
    }
}
