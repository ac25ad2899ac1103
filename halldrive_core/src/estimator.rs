//! Velocity estimator over the pulse stream.
//!
//! Consumes `PulseCapture` snapshots at the control rate, routes every new
//! period through the calibrator (feeding an active calibration/alignment
//! run and applying the LUT correction), smooths the corrected period with
//! an EMA and derives rpm and angular velocity. The sector index lives
//! here and advances once per accepted pulse in the current step
//! direction; it is never advanced by time.

use crate::calibrator::SectorCalibrator;
use crate::pulse::{PulseCapture, PulseIsr};
use crate::util::step_sector;
use halldrive_traits::Clock;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub struct EncoderCfg {
    /// Sectors (magnets) per revolution.
    pub ppr: u16,
    /// Count on the rising edge instead of the falling one. Consumed by
    /// the hardware bringup; recorded here so one struct describes the
    /// whole channel.
    pub count_rising: bool,
    /// Negate reported rpm/omega.
    pub invert: bool,
    /// Hardware glitch filter width, backend units (0 = off).
    pub glitch_cycles: u16,
    /// Software debounce window on top of the hardware filter, us.
    pub min_gap_us: u32,
    /// EMA mix for the corrected period, [0, 1]. 1 disables smoothing.
    pub alpha_period: f32,
    /// Declare standstill after this long without pulses.
    pub timeout_stop_ms: u64,
}

impl Default for EncoderCfg {
    fn default() -> Self {
        Self {
            ppr: 8,
            count_rising: false,
            invert: false,
            glitch_cycles: 0,
            min_gap_us: 0,
            alpha_period: 1.0,
            timeout_stop_ms: 2000,
        }
    }
}

pub struct VelocityEstimator {
    cfg: EncoderCfg,
    capture: PulseCapture,
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,

    sector_idx: u16,
    step_dir: i8,
    last_count: u32,

    period_ema_us: f32,
    rpm: f32,
    omega: f32,
    last_seen_ms: u64,
}

impl std::fmt::Debug for VelocityEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VelocityEstimator")
            .field("sector_idx", &self.sector_idx)
            .field("step_dir", &self.step_dir)
            .field("rpm", &self.rpm)
            .field("period_ema_us", &self.period_ema_us)
            .finish()
    }
}

impl VelocityEstimator {
    pub fn new(cfg: EncoderCfg, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        let capture = PulseCapture::new(cfg.min_gap_us);
        let epoch = clock.now();
        let last_seen_ms = clock.ms_since(epoch);
        Self {
            cfg,
            capture,
            clock,
            epoch,
            sector_idx: 0,
            step_dir: 1,
            last_count: 0,
            period_ema_us: 0.0,
            rpm: 0.0,
            omega: 0.0,
            last_seen_ms,
        }
    }

    /// Consume new pulses and refresh rpm/omega. Call at the control rate
    /// (~100 Hz). The calibrator is borrowed for the duration of the tick;
    /// both are owned by the same control task.
    pub fn update(&mut self, cal: &mut SectorCalibrator) {
        let snap = self.capture.snapshot();
        if snap.count == self.last_count {
            let now_ms = self.clock.ms_since(self.epoch);
            if now_ms.saturating_sub(self.last_seen_ms) > self.cfg.timeout_stop_ms
                && (self.rpm != 0.0 || self.omega != 0.0 || self.period_ema_us != 0.0)
            {
                self.rpm = 0.0;
                self.omega = 0.0;
                self.period_ema_us = 0.0;
                debug!("pulse timeout, velocity forced to zero");
            }
            return;
        }

        // More than one pulse may have landed since the last tick; the last
        // valid period is the best available estimate for each of them.
        let pulses = snap.count.wrapping_sub(self.last_count);
        self.last_count = snap.count;
        for _ in 0..pulses {
            self.apply_period(snap.last_period_us as f32, cal);
        }
    }

    fn apply_period(&mut self, dt_us: f32, cal: &mut SectorCalibrator) {
        // The very first edge after reset carries no interval; it still
        // marks a sector transition.
        if dt_us <= 0.0 {
            self.sector_idx = step_sector(self.sector_idx, self.step_dir, self.cfg.ppr);
            return;
        }

        // 1) Calibration/alignment integration, then LUT correction.
        if cal.is_calibrating() || cal.is_aligning() {
            cal.feed_period(self.sector_idx, dt_us);
            if cal.is_calibrating() {
                cal.finish_calibration_if_ready();
            }
            if cal.is_aligning() {
                if let Some((offset, score)) = cal.finish_alignment_if_ready() {
                    debug!(offset, score, "alignment offset applied; estimator restarted");
                    self.period_ema_us = 0.0;
                    self.rpm = 0.0;
                    self.omega = 0.0;
                }
            }
        }
        let dt = cal.correct_dt(self.sector_idx, dt_us, self.step_dir);

        // 2) EMA of the corrected period.
        if self.period_ema_us <= 0.0 {
            self.period_ema_us = dt;
        } else {
            let a = self.cfg.alpha_period;
            self.period_ema_us = (1.0 - a) * self.period_ema_us + a * dt;
        }

        // 3) Derive rpm / omega.
        if self.period_ema_us > 0.0 {
            let rev_per_s = 1.0e6 / (self.cfg.ppr as f32 * self.period_ema_us);
            let mut rpm = 60.0 * rev_per_s;
            let mut omega = std::f32::consts::TAU * rev_per_s;
            if self.cfg.invert {
                rpm = -rpm;
                omega = -omega;
            }
            self.rpm = rpm;
            self.omega = omega;
            self.last_seen_ms = self.clock.ms_since(self.epoch);
            trace!(rpm, omega, ema_us = self.period_ema_us, "pulse processed");
        }

        // 4) Advance the sector in the current step direction.
        self.sector_idx = step_sector(self.sector_idx, self.step_dir, self.cfg.ppr);
    }

    /// Handle for whatever produces pulses (GPIO callback, plant, test).
    pub fn pulse_isr(&self) -> PulseIsr {
        self.capture.isr()
    }

    /// Smoothed rpm. Sign follows `invert` only; direction is the wheel's
    /// business.
    pub fn rpm(&self) -> f32 {
        self.rpm
    }

    /// Smoothed angular velocity magnitude, rad/s.
    pub fn omega(&self) -> f32 {
        self.omega
    }

    pub fn period_ema_us(&self) -> f32 {
        self.period_ema_us
    }

    pub fn sector_idx(&self) -> u16 {
        self.sector_idx
    }

    pub fn set_sector_idx(&mut self, k: u16) {
        self.sector_idx = k % self.cfg.ppr;
    }

    /// +1: sector index increments per pulse; -1: decrements.
    pub fn set_step_direction(&mut self, dir: i8) {
        self.step_dir = if dir >= 0 { 1 } else { -1 };
    }

    pub fn step_direction(&self) -> i8 {
        self.step_dir
    }

    pub fn last_seen_ms(&self) -> u64 {
        self.last_seen_ms
    }

    pub fn ppr(&self) -> u16 {
        self.cfg.ppr
    }

    pub fn cfg(&self) -> &EncoderCfg {
        &self.cfg
    }

    /// Forget everything: counters, EMA, sector, direction.
    pub fn zero(&mut self) {
        self.capture.reset();
        self.last_count = 0;
        self.period_ema_us = 0.0;
        self.rpm = 0.0;
        self.omega = 0.0;
        self.sector_idx = 0;
        self.step_dir = 1;
        self.last_seen_ms = self.clock.ms_since(self.epoch);
    }
}
