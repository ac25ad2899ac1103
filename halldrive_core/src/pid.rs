//! Velocity PID on scalar magnitudes.
//!
//! Two discretizations behind one selector:
//!
//! - `Incremental` (default), the velocity form:
//!
//!   u[n] = u[n-1]
//!        + (Kp + Kd/Ts)            * e[n]
//!        + (-Kp + Ki*Ts - 2*Kd/Ts) * e[n-1]
//!        + (Kd/Ts)                 * e[n-2]
//!
//! - `ParallelPidf`: parallel PID with derivative-on-measurement through a
//!   first-order filter and trapezoidal integration with clamping
//!   anti-windup.
//!
//! The controller works in magnitudes; by default it saturates in [0, 1]
//! and the actuator layer reapplies the sign.

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Discretization {
    #[default]
    Incremental,
    ParallelPidf,
}

#[derive(Debug, Clone)]
pub struct PidCfg {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    /// Derivative filter time constant, seconds. Only used by
    /// `ParallelPidf`; <= 0 disables the filter (alpha = 1).
    pub tf: f32,
    /// Sample period, seconds.
    pub ts: f32,
    pub u_min: f32,
    pub u_max: f32,
    pub clamp_output: bool,
    pub mode: Discretization,
    /// Clamping anti-windup for `ParallelPidf`.
    pub anti_windup: bool,
}

impl Default for PidCfg {
    fn default() -> Self {
        Self {
            kp: 0.0,
            ki: 0.0,
            kd: 0.0,
            tf: 0.0,
            ts: 0.01,
            u_min: 0.0,
            u_max: 1.0,
            clamp_output: true,
            mode: Discretization::Incremental,
            anti_windup: true,
        }
    }
}

#[derive(Debug)]
pub struct PidVel {
    cfg: PidCfg,

    // shared state
    e: f32,
    e1: f32,
    e2: f32,
    u: f32,
    u_prev: f32,

    // parallel-form state
    integ: f32,
    dy_filt: f32,
    y_prev: Option<f32>,

    // last ref/measurement, for logs and debugging
    ref_mag: f32,
    meas_mag: f32,

    // incremental coefficients, recomputed only on tuning changes
    c0: f32,
    c1: f32,
    c2: f32,
}

impl PidVel {
    pub fn new(cfg: PidCfg) -> Self {
        let mut pid = Self {
            cfg,
            e: 0.0,
            e1: 0.0,
            e2: 0.0,
            u: 0.0,
            u_prev: 0.0,
            integ: 0.0,
            dy_filt: 0.0,
            y_prev: None,
            ref_mag: 0.0,
            meas_mag: 0.0,
            c0: 0.0,
            c1: 0.0,
            c2: 0.0,
        };
        pid.recompute_coeffs();
        pid.reset(0.0);
        pid
    }

    fn recompute_coeffs(&mut self) {
        let kp = self.cfg.kp;
        let ki = self.cfg.ki;
        let kd = self.cfg.kd;
        let ts = if self.cfg.ts > 1e-9 { self.cfg.ts } else { 1e-3 };

        self.c0 = kp + kd / ts;
        self.c1 = -kp + ki * ts - 2.0 * kd / ts;
        self.c2 = kd / ts;
        debug!(
            c0 = self.c0,
            c1 = self.c1,
            c2 = self.c2,
            kp,
            ki,
            kd,
            ts,
            "pid coefficients"
        );
    }

    /// One control step with reference and measurement magnitudes.
    /// Returns u[n], saturated to [u_min, u_max] when clamping is on.
    pub fn update(&mut self, ref_mag: f32, meas_mag: f32) -> f32 {
        self.ref_mag = ref_mag;
        self.meas_mag = meas_mag;
        match self.cfg.mode {
            Discretization::Incremental => self.update_incremental(),
            Discretization::ParallelPidf => self.update_pidf(),
        }
    }

    fn update_incremental(&mut self) -> f32 {
        self.e = self.ref_mag - self.meas_mag;

        let mut u_n = self.u_prev + self.c0 * self.e + self.c1 * self.e1 + self.c2 * self.e2;
        if self.cfg.clamp_output {
            u_n = u_n.clamp(self.cfg.u_min, self.cfg.u_max);
        }

        self.e2 = self.e1;
        self.e1 = self.e;
        self.u_prev = u_n;
        self.u = u_n;
        self.u
    }

    fn update_pidf(&mut self) -> f32 {
        let ts = if self.cfg.ts > 1e-9 { self.cfg.ts } else { 1e-3 };
        self.e = self.ref_mag - self.meas_mag;

        // Derivative on measurement through a first-order filter.
        let alpha = if self.cfg.tf > 0.0 { ts / (self.cfg.tf + ts) } else { 1.0 };
        let dy = match self.y_prev {
            Some(prev) => self.meas_mag - prev,
            None => 0.0,
        };
        self.dy_filt = (1.0 - alpha) * self.dy_filt + alpha * dy;
        let d = -self.cfg.kd * self.dy_filt / ts;

        // Trapezoidal integrator with clamping anti-windup: skip the update
        // when the pre-saturation output sits at a limit and the error
        // pushes further into saturation.
        let di = self.cfg.ki * (ts / 2.0) * (self.e + self.e1);
        let u_unsat = self.cfg.kp * self.e + self.integ + d;
        let saturating_high = u_unsat >= self.cfg.u_max && self.e > 0.0;
        let saturating_low = u_unsat <= self.cfg.u_min && self.e < 0.0;
        let windup_hold =
            self.cfg.anti_windup && self.cfg.clamp_output && (saturating_high || saturating_low);
        if !windup_hold {
            self.integ += di;
        }

        let mut u_n = self.cfg.kp * self.e + self.integ + d;
        if self.cfg.clamp_output {
            u_n = u_n.clamp(self.cfg.u_min, self.cfg.u_max);
        }

        self.e2 = self.e1;
        self.e1 = self.e;
        self.y_prev = Some(self.meas_mag);
        self.u_prev = u_n;
        self.u = u_n;
        self.u
    }

    // ---- tunings / hot reconfiguration ----

    pub fn set_tunings(&mut self, kp: f32, ki: f32, kd: f32) {
        self.cfg.kp = kp;
        self.cfg.ki = ki;
        self.cfg.kd = kd;
        self.recompute_coeffs();
    }

    pub fn set_ts(&mut self, ts: f32) {
        self.cfg.ts = ts;
        self.recompute_coeffs();
    }

    pub fn set_output_limits(&mut self, u_min: f32, u_max: f32, clamp: bool) {
        self.cfg.u_min = u_min.min(u_max);
        self.cfg.u_max = u_min.max(u_max);
        self.cfg.clamp_output = clamp;
    }

    // ---- state ----

    /// Bumpless reinitialization: u[n-1] = u0, errors and derivative/
    /// integrator state cleared (the integrator is seeded with u0 so the
    /// parallel form restarts from the same output).
    pub fn reset(&mut self, u0: f32) {
        self.e = 0.0;
        self.e1 = 0.0;
        self.e2 = 0.0;
        self.u_prev = u0;
        self.u = u0;
        self.integ = u0;
        self.dy_filt = 0.0;
        self.y_prev = None;
    }

    // ---- getters ----

    pub fn u(&self) -> f32 {
        self.u
    }
    pub fn u_prev(&self) -> f32 {
        self.u_prev
    }
    pub fn e(&self) -> f32 {
        self.e
    }
    pub fn e1(&self) -> f32 {
        self.e1
    }
    pub fn e2(&self) -> f32 {
        self.e2
    }
    pub fn ts(&self) -> f32 {
        self.cfg.ts
    }
    pub fn mode(&self) -> Discretization {
        self.cfg.mode
    }
    pub fn coeffs(&self) -> (f32, f32, f32) {
        (self.c0, self.c1, self.c2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(kp: f32, ki: f32, kd: f32, ts: f32) -> PidCfg {
        PidCfg {
            kp,
            ki,
            kd,
            ts,
            ..PidCfg::default()
        }
    }

    #[test]
    fn coefficients_match_closed_form() {
        let pid = PidVel::new(cfg(0.5, 1.0, 0.02, 0.01));
        let (c0, c1, c2) = pid.coeffs();
        assert!((c0 - (0.5 + 0.02 / 0.01)).abs() < 1e-6);
        assert!((c1 - (-0.5 + 1.0 * 0.01 - 2.0 * 0.02 / 0.01)).abs() < 1e-6);
        assert!((c2 - 0.02 / 0.01).abs() < 1e-6);
    }

    #[test]
    fn first_update_is_c0_times_error() {
        let mut pid = PidVel::new(cfg(0.5, 1.0, 0.0, 0.01));
        let u = pid.update(1.0, 0.0); // e = 1
        assert!((u - 0.5).abs() < 1e-6); // c0 = Kp when Kd = 0
    }

    #[test]
    fn output_clamps_to_limits() {
        let mut pid = PidVel::new(cfg(10.0, 0.0, 0.0, 0.01));
        assert_eq!(pid.update(1.0, 0.0), 1.0);
        // Negative error drives toward u_min = 0.
        assert_eq!(pid.update(0.0, 10.0), 0.0);
    }

    #[test]
    fn reset_zeroes_errors_and_seeds_output() {
        let mut pid = PidVel::new(cfg(0.5, 1.0, 0.0, 0.01));
        pid.update(1.0, 0.0);
        pid.update(1.0, 0.2);
        pid.reset(0.0);
        assert_eq!(pid.u_prev(), 0.0);
        assert_eq!(pid.e1(), 0.0);
        assert_eq!(pid.e2(), 0.0);
    }

    #[test]
    fn integrator_accumulates_when_unclamped() {
        let mut pid = PidVel::new(PidCfg {
            kp: 0.0,
            ki: 1.0,
            ts: 0.5,
            mode: Discretization::ParallelPidf,
            ..PidCfg::default()
        });
        // Trapezoid of e: first step (0 + 1)/2 * 0.5 * Ki = 0.25
        let u1 = pid.update(1.0, 0.0);
        assert!((u1 - 0.25).abs() < 1e-6);
        // Second step: (1 + 1)/2 * 0.5 = +0.5 -> 0.75
        let u2 = pid.update(1.0, 0.0);
        assert!((u2 - 0.75).abs() < 1e-6);
    }

    #[test]
    fn anti_windup_holds_integrator_at_saturation() {
        let mut pid = PidVel::new(PidCfg {
            kp: 0.0,
            ki: 10.0,
            ts: 0.1,
            mode: Discretization::ParallelPidf,
            ..PidCfg::default()
        });
        for _ in 0..50 {
            assert!(pid.update(1.0, 0.0) <= 1.0);
        }
        // Integrator was held near the limit: a sign flip of the error must
        // pull the output off the rail quickly, not after unwinding a huge
        // accumulated term.
        let mut u = 1.0;
        for _ in 0..3 {
            u = pid.update(0.0, 1.0);
        }
        assert!(u < 1.0, "output stuck at saturation: {u}");
    }

    #[test]
    fn derivative_acts_on_measurement() {
        let mut pid = PidVel::new(PidCfg {
            kp: 0.0,
            ki: 0.0,
            kd: 0.1,
            tf: 0.0,
            ts: 0.1,
            clamp_output: false,
            u_min: -10.0,
            u_max: 10.0,
            mode: Discretization::ParallelPidf,
            ..PidCfg::default()
        });
        pid.update(0.0, 0.0);
        // Measurement jumps up: derivative term must push the output down.
        let u = pid.update(0.0, 1.0);
        assert!(u < 0.0, "expected negative kick, got {u}");
    }
}
