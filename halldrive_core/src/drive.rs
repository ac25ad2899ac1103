//! Two-wheel coordinator: twist kinematics, ramps, saturation-preserving
//! rescale, and coordinated calibration/alignment via spin-in-place.

use crate::error::{Result, StartError};
use crate::wheel::Wheel;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct DriveCfg {
    /// Wheel radius r, meters.
    pub wheel_radius: f32,
    /// Track width L (wheel-to-wheel), meters.
    pub track_width: f32,

    /// Twist limits.
    pub v_max: f32,
    pub w_max: f32,
    pub clamp_twist: bool,

    /// First-order ramps; <= 0 disables the ramp for that channel.
    pub v_acc_max: f32,
    pub w_acc_max: f32,

    /// Per-wheel angular velocity limit; <= 0 disables.
    pub omega_wheel_max: f32,
    pub rescale_twist_to_wheel_limit: bool,

    /// Coordinated alignment at boot when patterns are usable.
    pub auto_coordinated_align_on_boot: bool,
    pub align_laps_boot: u8,
    /// Spin rate held during a coordinated alignment, rad/s.
    pub align_assist_w: f32,
    /// Spin rate held during a coordinated calibration, rad/s.
    pub calib_assist_w: f32,
}

impl Default for DriveCfg {
    fn default() -> Self {
        Self {
            wheel_radius: 0.05,
            track_width: 0.20,
            v_max: 0.8,
            w_max: 6.0,
            clamp_twist: true,
            v_acc_max: 1.5,
            w_acc_max: 10.0,
            omega_wheel_max: 120.0,
            rescale_twist_to_wheel_limit: true,
            auto_coordinated_align_on_boot: true,
            align_laps_boot: 3,
            align_assist_w: 2.0,
            calib_assist_w: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CoordState {
    Idle,
    AlignRight,
    AlignLeft,
    CalibRight,
    CalibLeft,
}

pub struct DifferentialDrive {
    cfg: DriveCfg,
    right: Wheel,
    left: Wheel,

    // External references (when no coordination is running).
    v_ref: f32,
    w_ref: f32,
    // Commands after ramps/rescale.
    v_cmd: f32,
    w_cmd: f32,
    // Per-wheel targets.
    omega_r_cmd: f32,
    omega_l_cmd: f32,

    coord: CoordState,
    coord_laps: u8,
    coord_w: f32,
}

impl std::fmt::Debug for DifferentialDrive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DifferentialDrive")
            .field("v_cmd", &self.v_cmd)
            .field("w_cmd", &self.w_cmd)
            .field("coord", &self.coord)
            .finish()
    }
}

impl DifferentialDrive {
    pub fn new(cfg: DriveCfg, right: Wheel, left: Wheel) -> Self {
        Self {
            cfg,
            right,
            left,
            v_ref: 0.0,
            w_ref: 0.0,
            v_cmd: 0.0,
            w_cmd: 0.0,
            omega_r_cmd: 0.0,
            omega_l_cmd: 0.0,
            coord: CoordState::Idle,
            coord_laps: 0,
            coord_w: 0.0,
        }
    }

    /// Bring both wheels up and, when configured, start a coordinated
    /// alignment if at least one side has a usable pattern.
    pub fn begin(&mut self) -> Result<()> {
        self.right.begin()?;
        self.left.begin()?;
        info!(
            r = self.cfg.wheel_radius,
            l = self.cfg.track_width,
            v_max = self.cfg.v_max,
            w_max = self.cfg.w_max,
            omega_wheel_max = self.cfg.omega_wheel_max,
            "drive up"
        );

        if self.cfg.auto_coordinated_align_on_boot {
            let ok_r = self.right.use_lut() && self.right.pattern_ready();
            let ok_l = self.left.use_lut() && self.left.pattern_ready();
            if ok_r || ok_l {
                let laps = self.cfg.align_laps_boot;
                let w = self.cfg.align_assist_w;
                if let Err(e) = self.start_coordinated_alignment(laps, w) {
                    debug!(error = %e, "boot coordinated alignment skipped");
                }
            }
        }
        Ok(())
    }

    // ---------------- high-level commands ----------------

    /// New twist reference. Ignored while a coordinated routine runs.
    pub fn set_twist(&mut self, v_mps: f32, w_radps: f32) {
        if self.is_coordinated_routine_running() {
            return;
        }
        self.v_ref = v_mps;
        self.w_ref = w_radps;
        if self.cfg.clamp_twist {
            self.v_ref = self.v_ref.clamp(-self.cfg.v_max, self.cfg.v_max);
            self.w_ref = self.w_ref.clamp(-self.cfg.w_max, self.cfg.w_max);
        }
    }

    pub fn stop(&mut self) {
        self.set_twist(0.0, 0.0);
    }

    pub fn neutral(&mut self) {
        self.right.neutral();
        self.left.neutral();
    }

    /// Periodic update (100 Hz typical). Runs either the normal twist path
    /// or the coordinated routine.
    pub fn update(&mut self, dt_s: f32) -> Result<()> {
        if self.is_coordinated_routine_running() {
            return self.coord_update(dt_s);
        }

        self.apply_limits_and_ramps(dt_s);
        let (wr, wl) = self.wheel_omegas_from_twist(self.v_cmd, self.w_cmd);
        self.omega_r_cmd = wr;
        self.omega_l_cmd = wl;

        if self.cfg.omega_wheel_max > 0.0 && self.cfg.rescale_twist_to_wheel_limit {
            self.rescale_to_wheel_limit();
        }

        self.right.set_omega_ref(self.omega_r_cmd);
        self.left.set_omega_ref(self.omega_l_cmd);
        self.right.update(dt_s)?;
        self.left.update(dt_s)?;
        Ok(())
    }

    // ---------------- readings ----------------

    pub fn v_ref(&self) -> f32 {
        self.v_ref
    }
    pub fn w_ref(&self) -> f32 {
        self.w_ref
    }
    pub fn v_cmd(&self) -> f32 {
        self.v_cmd
    }
    pub fn w_cmd(&self) -> f32 {
        self.w_cmd
    }
    pub fn omega_r(&self) -> f32 {
        self.omega_r_cmd
    }
    pub fn omega_l(&self) -> f32 {
        self.omega_l_cmd
    }

    pub fn wheel_r(&self) -> &Wheel {
        &self.right
    }
    pub fn wheel_l(&self) -> &Wheel {
        &self.left
    }
    pub fn wheel_r_mut(&mut self) -> &mut Wheel {
        &mut self.right
    }
    pub fn wheel_l_mut(&mut self) -> &mut Wheel {
        &mut self.left
    }

    // ---------------- coordinated routines ----------------

    pub fn is_coordinated_routine_running(&self) -> bool {
        self.coord != CoordState::Idle
    }

    /// Align whichever sides have a pattern, right first, spinning in
    /// place so the serviced wheel turns forward.
    pub fn start_coordinated_alignment(
        &mut self,
        laps: u8,
        w_assist: f32,
    ) -> std::result::Result<(), StartError> {
        if self.is_coordinated_routine_running() {
            return Err(StartError::Busy);
        }
        if laps == 0 {
            return Err(StartError::InvalidLaps);
        }
        let w = if w_assist > 0.0 {
            w_assist
        } else {
            self.cfg.align_assist_w
        };
        if self.right.pattern_ready() {
            self.coord_enter(CoordState::AlignRight, laps, w);
            Ok(())
        } else if self.left.pattern_ready() {
            self.coord_enter(CoordState::AlignLeft, laps, w);
            Ok(())
        } else {
            Err(StartError::PatternNotReady)
        }
    }

    /// Calibrate both sides, right first.
    pub fn start_coordinated_calibration(
        &mut self,
        laps: u8,
        w_assist: f32,
    ) -> std::result::Result<(), StartError> {
        if self.is_coordinated_routine_running() {
            return Err(StartError::Busy);
        }
        if laps == 0 {
            return Err(StartError::InvalidLaps);
        }
        let w = if w_assist > 0.0 {
            w_assist
        } else {
            self.cfg.calib_assist_w
        };
        self.coord_enter(CoordState::CalibRight, laps, w);
        Ok(())
    }

    /// Back to idle; all references zeroed.
    pub fn abort_coordinated_routine(&mut self) {
        if !self.is_coordinated_routine_running() {
            return;
        }
        self.coord_exit();
        info!("coordinated routine aborted");
    }

    // (Proxies for the individual routines.)
    pub fn start_calibration_r(&mut self, laps: u8) -> std::result::Result<(), StartError> {
        self.right.start_calibration(laps)
    }
    pub fn start_calibration_l(&mut self, laps: u8) -> std::result::Result<(), StartError> {
        self.left.start_calibration(laps)
    }
    pub fn start_alignment_r(&mut self, laps: u8) -> std::result::Result<(), StartError> {
        self.right.start_alignment(laps)
    }
    pub fn start_alignment_l(&mut self, laps: u8) -> std::result::Result<(), StartError> {
        self.left.start_alignment(laps)
    }

    // ---------------- internals ----------------

    fn apply_limits_and_ramps(&mut self, dt: f32) {
        if self.cfg.v_acc_max > 0.0 {
            let dv_max = self.cfg.v_acc_max * dt;
            let dv = self.v_ref - self.v_cmd;
            self.v_cmd += dv.clamp(-dv_max, dv_max);
        } else {
            self.v_cmd = self.v_ref;
        }

        if self.cfg.w_acc_max > 0.0 {
            let dw_max = self.cfg.w_acc_max * dt;
            let dw = self.w_ref - self.w_cmd;
            self.w_cmd += dw.clamp(-dw_max, dw_max);
        } else {
            self.w_cmd = self.w_ref;
        }

        if self.cfg.clamp_twist {
            self.v_cmd = self.v_cmd.clamp(-self.cfg.v_max, self.cfg.v_max);
            self.w_cmd = self.w_cmd.clamp(-self.cfg.w_max, self.cfg.w_max);
        }
    }

    fn wheel_omegas_from_twist(&self, v: f32, w: f32) -> (f32, f32) {
        let r = if self.cfg.wheel_radius > 1e-9 {
            self.cfg.wheel_radius
        } else {
            1e-3
        };
        let half_l = 0.5 * self.cfg.track_width;
        ((v + half_l * w) / r, (v - half_l * w) / r)
    }

    /// Scale (v, w) together so the fastest wheel sits exactly at the
    /// limit, preserving the v:w ratio and therefore the trajectory shape.
    fn rescale_to_wheel_limit(&mut self) {
        let a_max = self.omega_r_cmd.abs().max(self.omega_l_cmd.abs());
        let lim = self.cfg.omega_wheel_max;
        if a_max <= lim || lim <= 0.0 {
            return;
        }
        let k = lim / a_max;
        self.v_cmd *= k;
        self.w_cmd *= k;
        let (wr, wl) = self.wheel_omegas_from_twist(self.v_cmd, self.w_cmd);
        self.omega_r_cmd = wr;
        self.omega_l_cmd = wl;
        debug!(k, lim, "twist rescaled to wheel limit");
    }

    fn coord_enter(&mut self, state: CoordState, laps: u8, w_assist: f32) {
        self.coord = state;
        self.coord_laps = laps;
        self.coord_w = w_assist.abs();

        // The spin provides the motion, so the wheel-level assist stays
        // off for coordinated runs. The spin sign always turns the
        // serviced wheel forward, so its routine direction is pinned to +1
        // regardless of which way that wheel was just turning.
        let started = match state {
            CoordState::AlignRight => self.right.start_alignment_dir(laps, 1, false).is_ok(),
            CoordState::AlignLeft => self.left.start_alignment_dir(laps, 1, false).is_ok(),
            CoordState::CalibRight => self.right.start_calibration_dir(laps, 1, false).is_ok(),
            CoordState::CalibLeft => self.left.start_calibration_dir(laps, 1, false).is_ok(),
            CoordState::Idle => false,
        };
        if started {
            info!(state = ?state, laps, w = self.coord_w, "coordinated phase start");
        } else {
            debug!(state = ?state, "coordinated phase could not start");
            self.coord_exit();
        }
    }

    fn coord_exit(&mut self) {
        self.coord = CoordState::Idle;
        self.coord_laps = 0;
        self.coord_w = 0.0;
        self.right.set_omega_ref(0.0);
        self.left.set_omega_ref(0.0);
        self.v_ref = 0.0;
        self.w_ref = 0.0;
        self.v_cmd = 0.0;
        self.w_cmd = 0.0;
    }

    fn coord_update(&mut self, dt: f32) -> Result<()> {
        // Spin in place; the sign puts the serviced side in its positive
        // direction (right forward => +w, left forward => -w).
        let w_spin = match self.coord {
            CoordState::AlignRight | CoordState::CalibRight => self.coord_w,
            CoordState::AlignLeft | CoordState::CalibLeft => -self.coord_w,
            CoordState::Idle => 0.0,
        };

        self.v_ref = 0.0;
        self.w_ref = w_spin;
        self.apply_limits_and_ramps(dt);
        let (wr, wl) = self.wheel_omegas_from_twist(self.v_cmd, self.w_cmd);
        self.omega_r_cmd = wr;
        self.omega_l_cmd = wl;

        self.right.set_omega_ref(self.omega_r_cmd);
        self.left.set_omega_ref(self.omega_l_cmd);
        self.right.update(dt)?;
        self.left.update(dt)?;

        // Phase transitions when the serviced wheel's routine goes idle.
        match self.coord {
            CoordState::AlignRight => {
                if !self.right.is_aligning() {
                    if self.left.pattern_ready() {
                        let (laps, w) = (self.coord_laps, self.coord_w);
                        self.coord_enter(CoordState::AlignLeft, laps, w);
                    } else {
                        self.coord_exit();
                    }
                }
            }
            CoordState::AlignLeft => {
                if !self.left.is_aligning() {
                    self.coord_exit();
                }
            }
            CoordState::CalibRight => {
                if !self.right.is_calibrating() {
                    let (laps, w) = (self.coord_laps, self.coord_w);
                    self.coord_enter(CoordState::CalibLeft, laps, w);
                }
            }
            CoordState::CalibLeft => {
                if !self.left.is_calibrating() {
                    self.coord_exit();
                }
            }
            CoordState::Idle => self.coord_exit(),
        }
        Ok(())
    }
}
