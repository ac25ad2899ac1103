//! One driven wheel: motor + encoder + PID + sector calibrator.
//!
//! The wheel takes a signed angular velocity reference, runs a magnitude
//! PID against the estimator and reapplies the reference sign at the
//! actuator. It is also the place where the step direction is inferred
//! (hysteresis on the applied motor command) and where calibration and
//! alignment runs are orchestrated, including the open-loop "assist" hold
//! that keeps the wheel turning steadily while a run collects laps.

use crate::calibrator::SectorCalibrator;
use crate::error::{Result, StartError};
use crate::estimator::VelocityEstimator;
use crate::motor::MotorPwm;
use crate::pid::PidVel;
use crate::pulse::PulseIsr;
use halldrive_traits::Clock;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct WheelCfg {
    /// Allow routines to hold the motor open-loop while they run.
    pub assist_enabled: bool,
    /// |u| to hold during an assisted calibration/alignment.
    pub assist_u: f32,
    /// |u_applied| above this pins the inferred step direction.
    pub dir_eps_u: f32,
    /// Keep the previous direction for at least this long near zero.
    pub dir_hold_ms: u64,
    /// Try an alignment at boot when the current direction has a usable
    /// pattern.
    pub auto_align_on_boot: bool,
    pub align_laps_boot: u8,
}

impl Default for WheelCfg {
    fn default() -> Self {
        Self {
            assist_enabled: true,
            assist_u: 0.50,
            dir_eps_u: 0.05,
            dir_hold_ms: 200,
            auto_align_on_boot: true,
            align_laps_boot: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssistMode {
    None,
    Cal,
    Align,
}

pub struct Wheel {
    cfg: WheelCfg,

    motor: MotorPwm,
    est: VelocityEstimator,
    cal: SectorCalibrator,
    pid: PidVel,

    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,

    omega_ref: f32,
    ref_sign: i8,
    last_ref_sign: i8,
    last_u_cmd: f32,

    assist: AssistMode,
    assist_prev_u: f32,

    dir: i8,
    routine_dir: i8,
    last_strong_cmd_ms: u64,

    was_cal: bool,
    was_align: bool,
}

impl std::fmt::Debug for Wheel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wheel")
            .field("omega_ref", &self.omega_ref)
            .field("dir", &self.dir)
            .field("calibrating", &self.cal.is_calibrating())
            .field("aligning", &self.cal.is_aligning())
            .finish()
    }
}

impl Wheel {
    pub fn builder() -> crate::builder::WheelBuilder<crate::builder::Missing, crate::builder::Missing>
    {
        crate::builder::WheelBuilder::default()
    }

    pub(crate) fn from_parts(
        cfg: WheelCfg,
        motor: MotorPwm,
        est: VelocityEstimator,
        cal: SectorCalibrator,
        pid: PidVel,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        let epoch = clock.now();
        Self {
            cfg,
            motor,
            est,
            cal,
            pid,
            clock,
            epoch,
            omega_ref: 0.0,
            ref_sign: 1,
            last_ref_sign: 1,
            last_u_cmd: 0.0,
            assist: AssistMode::None,
            assist_prev_u: 0.0,
            dir: 1,
            routine_dir: 1,
            last_strong_cmd_ms: 0,
            was_cal: false,
            was_align: false,
        }
    }

    /// Load persisted calibration, bring the motor to neutral, and kick a
    /// boot alignment when configured and applicable.
    pub fn begin(&mut self) -> Result<()> {
        self.cal.load();
        self.motor.begin()?;
        info!(
            ppr = self.est.ppr(),
            use_fwd = self.cal.use_lut(1),
            use_rev = self.cal.use_lut(-1),
            pattern_fwd = self.cal.pattern_ready(1),
            pattern_rev = self.cal.pattern_ready(-1),
            assist_u = self.cfg.assist_u,
            "wheel up"
        );
        self.maybe_auto_align_on_boot();
        Ok(())
    }

    // ---------------- high-level control ----------------

    /// Signed reference, rad/s. The reference sign survives zero crossings
    /// (a stop keeps the last direction's LUT applied until the motor
    /// actually drives the other way).
    pub fn set_omega_ref(&mut self, omega_ref_signed: f32) {
        self.omega_ref = omega_ref_signed;
        if omega_ref_signed > 0.0 {
            self.ref_sign = 1;
        } else if omega_ref_signed < 0.0 {
            self.ref_sign = -1;
        }
        if self.ref_sign != self.last_ref_sign {
            self.pid.reset(0.0);
            self.last_ref_sign = self.ref_sign;
            debug!(sign = self.ref_sign, "reference sign change, pid reset");
        }
    }

    pub fn omega_ref(&self) -> f32 {
        self.omega_ref
    }

    /// One control tick (~100 Hz): consume pulses, advance slew, run the
    /// magnitude PID (unless an assist holds the motor open-loop), track
    /// routine completion.
    pub fn update(&mut self, dt_s: f32) -> Result<()> {
        self.est.update(&mut self.cal);
        self.motor.update(dt_s)?;

        let routine_active = self.cal.is_calibrating() || self.cal.is_aligning();
        if routine_active {
            self.est.set_step_direction(self.routine_dir);
        } else {
            self.apply_direction_logic();
        }

        // While an assist holds the motor the PID is not stepped at all;
        // u_prev stays frozen so releasing the assist cannot kick.
        if self.assist == AssistMode::None {
            let u_mag = self.pid.update(self.omega_ref.abs(), self.est.omega().abs());
            let u_signed = if self.ref_sign >= 0 { u_mag } else { -u_mag };
            self.command_motor(u_signed);
        }

        self.track_routine_end();
        Ok(())
    }

    // ---------------- calibration / alignment ----------------

    /// Learn a fresh LUT for the current direction over `laps` laps.
    pub fn start_calibration(&mut self, laps: u8) -> std::result::Result<(), StartError> {
        self.start_calibration_with(laps, self.cfg.assist_enabled)
    }

    /// Re-learn the pattern phase for the current direction.
    pub fn start_alignment(&mut self, laps: u8) -> std::result::Result<(), StartError> {
        self.start_alignment_with(laps, self.cfg.assist_enabled)
    }

    pub(crate) fn start_calibration_with(
        &mut self,
        laps: u8,
        use_assist: bool,
    ) -> std::result::Result<(), StartError> {
        self.start_calibration_dir(laps, self.dir, use_assist)
    }

    pub(crate) fn start_alignment_with(
        &mut self,
        laps: u8,
        use_assist: bool,
    ) -> std::result::Result<(), StartError> {
        self.start_alignment_dir(laps, self.dir, use_assist)
    }

    /// Routine start with an explicitly pinned direction. The coordinator
    /// uses this: its spin turns the serviced wheel forward no matter what
    /// the wheel's inferred direction was a tick earlier.
    pub(crate) fn start_calibration_dir(
        &mut self,
        laps: u8,
        dir: i8,
        use_assist: bool,
    ) -> std::result::Result<(), StartError> {
        self.cal.start_calibration(laps, dir)?;
        self.routine_dir = dir;
        self.est.set_step_direction(dir);
        info!(laps, dir, "calibration start");
        if use_assist {
            self.assist_begin(AssistMode::Cal, dir);
        }
        Ok(())
    }

    pub(crate) fn start_alignment_dir(
        &mut self,
        laps: u8,
        dir: i8,
        use_assist: bool,
    ) -> std::result::Result<(), StartError> {
        self.cal.start_alignment(laps, dir)?;
        self.routine_dir = dir;
        self.est.set_step_direction(dir);
        info!(laps, dir, "alignment start");
        if use_assist {
            self.assist_begin(AssistMode::Align, dir);
        }
        Ok(())
    }

    pub fn is_calibrating(&self) -> bool {
        self.cal.is_calibrating()
    }

    pub fn is_aligning(&self) -> bool {
        self.cal.is_aligning()
    }

    // ---------------- LUT utilities ----------------

    pub fn set_use_lut(&mut self, on: bool) {
        self.cal.set_use_lut(1, on);
        self.cal.set_use_lut(-1, on);
        if let Err(e) = self.cal.save() {
            tracing::warn!(error = %e, "persisting use flags failed");
        }
    }

    pub fn use_lut(&self) -> bool {
        self.cal.use_lut(1) || self.cal.use_lut(-1)
    }

    pub fn pattern_ready(&self) -> bool {
        self.cal.pattern_ready(1) || self.cal.pattern_ready(-1)
    }

    pub fn clear_lut(&mut self) -> Result<()> {
        self.cal.clear()
    }

    pub fn calibrator(&self) -> &SectorCalibrator {
        &self.cal
    }

    // ---------------- state / readings ----------------

    /// rad/s magnitude from the estimator.
    pub fn omega(&self) -> f32 {
        self.est.omega()
    }

    pub fn rpm(&self) -> f32 {
        self.est.rpm()
    }

    pub fn command_applied(&self) -> f32 {
        self.motor.command_applied()
    }

    pub fn command_target(&self) -> f32 {
        self.motor.command_target()
    }

    pub fn sector_idx(&self) -> u16 {
        self.est.sector_idx()
    }

    pub fn step_direction(&self) -> i8 {
        self.est.step_direction()
    }

    /// Handle for whatever produces this wheel's pulses.
    pub fn pulse_isr(&self) -> PulseIsr {
        self.est.pulse_isr()
    }

    pub fn neutral(&mut self) {
        self.command_motor(0.0);
    }

    pub fn reset_pid(&mut self, u0: f32) {
        self.pid.reset(u0);
    }

    // ---------------- private helpers ----------------

    fn command_motor(&mut self, u_signed: f32) {
        self.motor.set_command(u_signed);
        self.last_u_cmd = u_signed;
    }

    /// Infer the step direction from the sign of the applied motor
    /// command, with amplitude and time hysteresis near zero.
    fn apply_direction_logic(&mut self) {
        let u_a = self.motor.command_applied();
        let now_ms = self.clock.ms_since(self.epoch);

        if u_a.abs() > self.cfg.dir_eps_u {
            let s: i8 = if u_a >= 0.0 { 1 } else { -1 };
            if s != self.dir {
                self.dir = s;
                self.est.set_step_direction(s);
                debug!(dir = s, "step direction");
            }
            self.last_strong_cmd_ms = now_ms;
        } else if now_ms.saturating_sub(self.last_strong_cmd_ms) > self.cfg.dir_hold_ms {
            // Past the hold window the previous sign is still the best
            // guess; keep it rather than snapping forward.
        }
    }

    fn assist_begin(&mut self, mode: AssistMode, dir: i8) {
        self.assist_prev_u = self.last_u_cmd;
        self.assist = mode;
        let u = if dir >= 0 {
            self.cfg.assist_u
        } else {
            -self.cfg.assist_u
        };
        self.command_motor(u);
        debug!(u, dir, "assist hold engaged");
    }

    fn track_routine_end(&mut self) {
        let is_cal = self.cal.is_calibrating();
        let is_align = self.cal.is_aligning();

        if self.assist == AssistMode::Cal && self.was_cal && !is_cal {
            let u = self.assist_prev_u;
            self.command_motor(u);
            self.assist = AssistMode::None;
            debug!("assist released after calibration");
        }
        if self.assist == AssistMode::Align && self.was_align && !is_align {
            let u = self.assist_prev_u;
            self.command_motor(u);
            self.assist = AssistMode::None;
            debug!("assist released after alignment");
        }
        self.was_cal = is_cal;
        self.was_align = is_align;
    }

    fn maybe_auto_align_on_boot(&mut self) {
        if !self.cfg.auto_align_on_boot {
            return;
        }
        let dir = self.dir;
        if self.cal.use_lut(dir) && self.cal.pattern_ready(dir) {
            let laps = self.cfg.align_laps_boot;
            match self.start_alignment_with(laps, self.cfg.assist_enabled) {
                Ok(()) => info!(laps, dir, "boot auto-alignment started"),
                Err(e) => debug!(error = %e, "boot auto-alignment skipped"),
            }
        }
    }
}
