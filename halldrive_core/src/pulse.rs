//! Interrupt-side pulse capture.
//!
//! A `PulseIsr` handle is given to whatever runs in "interrupt" context (a
//! GPIO callback thread on real hardware, the plant in simulation, a plain
//! loop in tests). It is the sole writer of a three-word snapshot that the
//! control task reads under the same short critical section. The capture is
//! deliberately ignorant of direction, sectors and correction.

use std::sync::{Arc, Mutex};
use tracing::trace;

/// What the control task sees: accepted pulse count, the most recent valid
/// inter-pulse interval, and the timestamp of the last accepted edge.
///
/// `count` may advance by more than 1 between snapshots; consumers then
/// reuse `last_period_us` as the best estimate for each missed sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PulseSnapshot {
    pub count: u32,
    pub last_period_us: u32,
    pub last_ts_us: u64,
}

#[derive(Debug, Default)]
struct Shared {
    count: u32,
    last_period_us: u32,
    last_us: u64,
    seen_any: bool,
}

/// Consumer side. Owns the shared state; hands out ISR handles.
#[derive(Debug)]
pub struct PulseCapture {
    shared: Arc<Mutex<Shared>>,
    min_gap_us: u32,
}

/// Producer side; cloneable, safe to move into an interrupt callback.
#[derive(Debug, Clone)]
pub struct PulseIsr {
    shared: Arc<Mutex<Shared>>,
    min_gap_us: u32,
}

impl PulseCapture {
    /// `min_gap_us` is the software debounce window on top of whatever
    /// hardware glitch filter exists; 0 disables it.
    pub fn new(min_gap_us: u32) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::default())),
            min_gap_us,
        }
    }

    /// Handle for the interrupt side.
    pub fn isr(&self) -> PulseIsr {
        PulseIsr {
            shared: self.shared.clone(),
            min_gap_us: self.min_gap_us,
        }
    }

    /// Atomic snapshot of (count, last period, last timestamp).
    pub fn snapshot(&self) -> PulseSnapshot {
        let s = self.shared.lock().unwrap_or_else(|p| p.into_inner());
        PulseSnapshot {
            count: s.count,
            last_period_us: s.last_period_us,
            last_ts_us: s.last_us,
        }
    }

    /// Drop all captured state, including the "previous edge" memory.
    pub fn reset(&self) {
        let mut s = self.shared.lock().unwrap_or_else(|p| p.into_inner());
        *s = Shared::default();
    }
}

impl PulseIsr {
    /// Record one hardware edge at `now_us`. Returns false when the pulse
    /// was discarded by the debounce window.
    ///
    /// The first edge after a reset has no previous edge to measure
    /// against: it advances the count and timestamp but leaves the period
    /// at 0, which consumers skip.
    pub fn on_pulse(&self, now_us: u64) -> bool {
        let mut s = self.shared.lock().unwrap_or_else(|p| p.into_inner());
        if !s.seen_any {
            s.seen_any = true;
            s.count = s.count.wrapping_add(1);
            s.last_us = now_us;
            return true;
        }
        let gap = now_us.saturating_sub(s.last_us);
        if self.min_gap_us > 0 && gap < u64::from(self.min_gap_us) {
            trace!(gap, "pulse discarded by min gap");
            return false;
        }
        s.last_period_us = gap.min(u64::from(u32::MAX)) as u32;
        s.count = s.count.wrapping_add(1);
        s.last_us = now_us;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measures_periods_and_counts() {
        let cap = PulseCapture::new(0);
        let isr = cap.isr();
        assert!(isr.on_pulse(1_000));
        assert!(isr.on_pulse(11_000));
        assert!(isr.on_pulse(21_500));
        let snap = cap.snapshot();
        assert_eq!(snap.count, 3);
        assert_eq!(snap.last_period_us, 10_500);
        assert_eq!(snap.last_ts_us, 21_500);
    }

    #[test]
    fn min_gap_discards_glitches() {
        let cap = PulseCapture::new(500);
        let isr = cap.isr();
        isr.on_pulse(1_000);
        // 200us later: glitch, dropped without touching the snapshot.
        assert!(!isr.on_pulse(1_200));
        let snap = cap.snapshot();
        assert_eq!(snap.count, 1);
        assert_eq!(snap.last_ts_us, 1_000);
        // A legitimate pulse still measures from the accepted edge.
        assert!(isr.on_pulse(2_000));
        assert_eq!(cap.snapshot().last_period_us, 1_000);
    }

    #[test]
    fn first_pulse_has_no_period() {
        let cap = PulseCapture::new(0);
        let isr = cap.isr();
        isr.on_pulse(5_000);
        let snap = cap.snapshot();
        assert_eq!(snap.count, 1);
        assert_eq!(snap.last_period_us, 0);
    }

    #[test]
    fn reset_clears_everything() {
        let cap = PulseCapture::new(0);
        let isr = cap.isr();
        isr.on_pulse(1_000);
        isr.on_pulse(2_000);
        cap.reset();
        assert_eq!(cap.snapshot(), PulseSnapshot::default());
        // After reset the next edge is a "first" edge again.
        isr.on_pulse(9_000);
        assert_eq!(cap.snapshot().last_period_us, 0);
    }
}
