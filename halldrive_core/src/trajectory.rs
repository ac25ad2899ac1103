//! Rotate-then-advance maneuvers over a `DifferentialDrive`.
//!
//! Both phases use a symmetric trapezoidal velocity profile: ramp up over
//! the first third of the phase, hold the peak, ramp down over the last
//! third (t1 = tf/3, t2 = 2*tf/3, tf = 1.5 * |dq| / peak). The runner only
//! talks to the drive through `set_twist`/`update`.

use crate::drive::DifferentialDrive;
use crate::error::Result;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct TrajectoryCfg {
    /// Peaks used when the caller does not pass explicit ones.
    pub v_max_default: f32,
    pub w_max_default: f32,
    /// Optional softening of the requested peaks, (0, 1].
    pub v_peak_scale: f32,
    pub w_peak_scale: f32,
}

impl Default for TrajectoryCfg {
    fn default() -> Self {
        Self {
            v_max_default: 0.5,
            w_max_default: 3.0,
            v_peak_scale: 1.0,
            w_peak_scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct PhasePlan {
    dq: f32,       // magnitude: |dtheta| or distance
    peak_real: f32,
    t1: f32,
    t2: f32,
    tf: f32,
    neg: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Rotating,
    Advancing,
    Done,
}

#[derive(Debug)]
pub struct TrajectoryRunner {
    cfg: TrajectoryCfg,
    plan_rot: PhasePlan,
    plan_lin: PhasePlan,
    state: State,
    t: f32,
    v: f32,
    w: f32,
}

impl TrajectoryRunner {
    pub fn new(cfg: TrajectoryCfg) -> Self {
        Self {
            cfg,
            plan_rot: PhasePlan::default(),
            plan_lin: PhasePlan::default(),
            state: State::Idle,
            t: 0.0,
            v: 0.0,
            w: 0.0,
        }
    }

    /// Plan a rotation of `dtheta` rad (signed, in place) followed by a
    /// straight advance of `dist` m. Peaks <= 0 take the defaults.
    pub fn plan_rotate_advance(&mut self, dtheta: f32, dist: f32, w_peak: f32, v_peak: f32) {
        let w_peak = if w_peak > 0.0 {
            w_peak
        } else {
            self.cfg.w_max_default * self.cfg.w_peak_scale
        };
        let v_peak = if v_peak > 0.0 {
            v_peak
        } else {
            self.cfg.v_max_default * self.cfg.v_peak_scale
        };

        self.plan_rot = plan_phase(dtheta, w_peak);
        self.plan_lin = plan_phase(dist, v_peak);

        if self.plan_rot.dq > 0.0 {
            self.begin_rotation();
        } else if self.plan_lin.dq > 0.0 {
            self.begin_advance();
        } else {
            self.state = State::Done;
            self.v = 0.0;
            self.w = 0.0;
        }
        info!(
            dtheta = if self.plan_rot.neg { -self.plan_rot.dq } else { self.plan_rot.dq },
            dist = self.plan_lin.dq,
            tf_rot = self.plan_rot.tf,
            tf_lin = self.plan_lin.tf,
            "trajectory planned"
        );
    }

    /// Plan toward a point expressed in the robot frame: orient first,
    /// then advance.
    pub fn plan_from_point_in_robot_frame(&mut self, x_r: f32, y_r: f32, w_peak: f32, v_peak: f32) {
        let dtheta = y_r.atan2(x_r);
        let dist = x_r.hypot(y_r);
        self.plan_rotate_advance(dtheta, dist, w_peak, v_peak);
    }

    /// Abort the maneuver and zero the twist.
    pub fn cancel(&mut self, drive: &mut DifferentialDrive) {
        self.state = State::Done;
        self.v = 0.0;
        self.w = 0.0;
        drive.set_twist(0.0, 0.0);
        debug!("trajectory cancelled");
    }

    /// Restart the current phase from t = 0.
    pub fn restart(&mut self) {
        match self.state {
            State::Rotating => self.begin_rotation(),
            State::Advancing => self.begin_advance(),
            _ => {}
        }
    }

    /// Periodic update; evaluates the profile and drives the twist.
    pub fn update(&mut self, drive: &mut DifferentialDrive, dt_s: f32) -> Result<()> {
        if self.state == State::Done || self.state == State::Idle {
            drive.set_twist(0.0, 0.0);
            return drive.update(dt_s);
        }

        self.advance_time(dt_s);
        drive.set_twist(self.v, self.w);
        drive.update(dt_s)
    }

    pub fn is_finished(&self) -> bool {
        self.state == State::Done
    }
    pub fn is_rotating(&self) -> bool {
        self.state == State::Rotating
    }
    pub fn is_advancing(&self) -> bool {
        self.state == State::Advancing
    }

    pub fn v_cmd(&self) -> f32 {
        self.v
    }
    pub fn w_cmd(&self) -> f32 {
        self.w
    }
    pub fn t_in_phase(&self) -> f32 {
        self.t
    }

    fn begin_rotation(&mut self) {
        self.state = State::Rotating;
        self.t = 0.0;
        debug!(
            dq = self.plan_rot.dq,
            peak = self.plan_rot.peak_real,
            tf = self.plan_rot.tf,
            "rotation phase"
        );
    }

    fn begin_advance(&mut self) {
        self.state = State::Advancing;
        self.t = 0.0;
        debug!(
            dq = self.plan_lin.dq,
            peak = self.plan_lin.peak_real,
            tf = self.plan_lin.tf,
            "advance phase"
        );
    }

    fn advance_time(&mut self, dt: f32) {
        self.t += dt;

        match self.state {
            State::Rotating => {
                let w_mag = eval_symmetric_trapezoid(
                    self.t,
                    self.plan_rot.t1,
                    self.plan_rot.t2,
                    self.plan_rot.tf,
                    self.plan_rot.peak_real,
                );
                self.w = if self.plan_rot.neg { -w_mag } else { w_mag };
                self.v = 0.0;

                if self.t >= self.plan_rot.tf {
                    self.w = 0.0;
                    if self.plan_lin.dq > 0.0 {
                        self.begin_advance();
                    } else {
                        self.state = State::Done;
                    }
                }
            }
            State::Advancing => {
                let v_mag = eval_symmetric_trapezoid(
                    self.t,
                    self.plan_lin.t1,
                    self.plan_lin.t2,
                    self.plan_lin.tf,
                    self.plan_lin.peak_real,
                );
                self.v = if self.plan_lin.neg { -v_mag } else { v_mag };
                self.w = 0.0;

                if self.t >= self.plan_lin.tf {
                    self.v = 0.0;
                    self.state = State::Done;
                }
            }
            _ => {}
        }
    }
}

fn plan_phase(dq: f32, peak_req: f32) -> PhasePlan {
    let mut p = PhasePlan {
        neg: dq < 0.0,
        dq: dq.abs(),
        ..PhasePlan::default()
    };
    let (peak_real, t1, t2, tf) = compute_symmetric_trapezoid(p.dq, peak_req.abs());
    p.peak_real = peak_real;
    p.t1 = t1;
    p.t2 = t2;
    p.tf = tf;
    p
}

/// Symmetric trapezoid: accel and decel each take tf/3, so the area under
/// the profile at peak qd equals dq when tf = 1.5 * dq / qd.
fn compute_symmetric_trapezoid(dq_abs: f32, peak_req: f32) -> (f32, f32, f32, f32) {
    if dq_abs <= 0.0 || peak_req <= 0.0 {
        return (0.0, 0.0, 0.0, 0.0);
    }
    let tf = 1.5 * dq_abs / peak_req;
    let t1 = tf / 3.0;
    let t2 = 2.0 * t1;
    (peak_req, t1, t2, tf)
}

/// Profile velocity at time `t`: linear up on [0, t1], flat on [t1, t2],
/// linear down on [t2, tf]; zero outside.
fn eval_symmetric_trapezoid(t: f32, t1: f32, t2: f32, tf: f32, peak: f32) -> f32 {
    if tf <= 0.0 || peak <= 0.0 || t <= 0.0 || t >= tf {
        return 0.0;
    }
    if t < t1 {
        peak * (t / t1)
    } else if t < t2 {
        peak
    } else {
        peak * ((tf - t) / (tf - t2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trapezoid_timing_thirds() {
        let (peak, t1, t2, tf) = compute_symmetric_trapezoid(3.0, 2.0);
        assert_eq!(peak, 2.0);
        assert!((tf - 2.25).abs() < 1e-6); // 1.5 * 3 / 2
        assert!((t1 - 0.75).abs() < 1e-6);
        assert!((t2 - 1.5).abs() < 1e-6);
    }

    #[test]
    fn profile_integrates_to_dq() {
        // Numerically integrate the profile; must recover the distance.
        let dq = 2.0;
        let (peak, t1, t2, tf) = compute_symmetric_trapezoid(dq, 1.0);
        let n = 10_000;
        let dt = tf / n as f32;
        let mut area = 0.0f32;
        for i in 0..n {
            area += eval_symmetric_trapezoid((i as f32 + 0.5) * dt, t1, t2, tf, peak) * dt;
        }
        assert!((area - dq).abs() < 1e-2, "area {area} vs {dq}");
    }

    #[test]
    fn eval_is_zero_outside_the_profile() {
        assert_eq!(eval_symmetric_trapezoid(-0.1, 1.0, 2.0, 3.0, 1.0), 0.0);
        assert_eq!(eval_symmetric_trapezoid(3.0, 1.0, 2.0, 3.0, 1.0), 0.0);
        assert_eq!(eval_symmetric_trapezoid(0.0, 1.0, 2.0, 3.0, 1.0), 0.0);
    }

    #[test]
    fn zero_length_plan_is_immediately_done() {
        let mut tr = TrajectoryRunner::new(TrajectoryCfg::default());
        tr.plan_rotate_advance(0.0, 0.0, 0.0, 0.0);
        assert!(tr.is_finished());
    }

    #[test]
    fn point_in_robot_frame_orients_then_advances() {
        let mut tr = TrajectoryRunner::new(TrajectoryCfg::default());
        // Point straight ahead: no rotation phase, advance only.
        tr.plan_rotate_advance(0.0, 1.0, 0.0, 0.0);
        assert!(tr.is_advancing());

        let mut tr = TrajectoryRunner::new(TrajectoryCfg::default());
        tr.plan_from_point_in_robot_frame(0.0, 1.0, 0.0, 0.0);
        assert!(tr.is_rotating()); // 90 degrees to the left first
    }
}
