//! Test and helper mocks for halldrive_core.

use halldrive_traits::{Clock, PwmPair};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// PWM pair that accepts every write; duties are observable through the
/// motor stage's own getters.
pub struct NoopPwm;

impl PwmPair for NoopPwm {
    fn write_in1(&mut self, _duty: u32) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }

    fn write_in2(&mut self, _duty: u32) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

/// Deterministic clock whose time is advanced manually (or by `sleep`,
/// which advances without blocking).
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, d: Duration) {
        if let Ok(mut off) = self.offset.lock() {
            *off = off.saturating_add(d);
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let off = self.offset.lock().map(|g| *g).unwrap_or(Duration::ZERO);
        self.origin + off
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }
}
