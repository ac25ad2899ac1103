//! Signed-command PWM motor stage.
//!
//! Takes u in [-1, +1] and turns it into two duty-cycle channels through an
//! H-bridge (`PwmPair`). Handles inversion, slew-rate limiting, symmetric
//! deadband with a minimum-output remap (stiction floor), sign-magnitude or
//! locked-antiphase delivery, and a coast/brake neutral policy.

use crate::error::Result;
use crate::hw_error::map_hw_error;
use eyre::WrapErr;
use halldrive_traits::PwmPair;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NeutralMode {
    #[default]
    Coast,
    Brake,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriveMode {
    #[default]
    SignMagnitude,
    LockedAntiPhase,
}

#[derive(Debug, Clone)]
pub struct MotorCfg {
    /// PWM carrier frequency; consumed by the backend, logged here.
    pub freq_hz: u32,
    /// Duty resolution in bits; max duty = 2^bits - 1.
    pub resolution_bits: u8,
    /// Invert the logical sign of u.
    pub invert: bool,
    /// |u| below this maps to neutral.
    pub deadband: f32,
    /// Duty floor to overcome friction once outside the deadband.
    pub min_output: f32,
    /// Max change of |u| per second; <= 0 applies the target immediately.
    pub slew_rate_per_sec: f32,
    pub neutral_mode: NeutralMode,
    pub drive_mode: DriveMode,
}

impl Default for MotorCfg {
    fn default() -> Self {
        Self {
            freq_hz: 20_000,
            resolution_bits: 8,
            invert: false,
            deadband: 0.02,
            min_output: 0.08,
            slew_rate_per_sec: 0.0,
            neutral_mode: NeutralMode::Coast,
            drive_mode: DriveMode::SignMagnitude,
        }
    }
}

pub struct MotorPwm {
    cfg: MotorCfg,
    pwm: Box<dyn PwmPair>,

    max_duty: u32,
    last_duty_in1: u32,
    last_duty_in2: u32,

    u_target: f32,
    u_applied: f32,
    enabled: bool,
}

impl std::fmt::Debug for MotorPwm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotorPwm")
            .field("u_target", &self.u_target)
            .field("u_applied", &self.u_applied)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl MotorPwm {
    pub fn new(cfg: MotorCfg, pwm: Box<dyn PwmPair>) -> Self {
        let max_duty = (1u32 << cfg.resolution_bits.clamp(1, 16)) - 1;
        Self {
            cfg,
            pwm,
            max_duty,
            last_duty_in1: 0,
            last_duty_in2: 0,
            u_target: 0.0,
            u_applied: 0.0,
            enabled: true,
        }
    }

    /// Put the stage in a known state: zero command, neutral outputs.
    pub fn begin(&mut self) -> Result<()> {
        self.u_target = 0.0;
        self.u_applied = 0.0;
        self.enabled = true;
        self.neutral()?;
        info!(
            freq_hz = self.cfg.freq_hz,
            resolution_bits = self.cfg.resolution_bits,
            max_duty = self.max_duty,
            "motor pwm up"
        );
        Ok(())
    }

    /// New setpoint, u in [-1, +1]. Takes effect through `update`.
    pub fn set_command(&mut self, u_signed: f32) {
        let u = if self.cfg.invert { -u_signed } else { u_signed };
        self.u_target = u.clamp(-1.0, 1.0);
    }

    pub fn command_target(&self) -> f32 {
        self.u_target
    }

    pub fn command_applied(&self) -> f32 {
        self.u_applied
    }

    /// Advance slew toward the target and refresh the outputs.
    pub fn update(&mut self, dt_s: f32) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        if self.cfg.slew_rate_per_sec > 0.0 && dt_s > 0.0 {
            let max_step = self.cfg.slew_rate_per_sec * dt_s;
            let err = self.u_target - self.u_applied;
            self.u_applied += err.clamp(-max_step, max_step);
        } else {
            self.u_applied = self.u_target;
        }

        let u_out = apply_deadband_min(self.u_applied, self.cfg.deadband, self.cfg.min_output);
        self.apply_outputs(u_out)
    }

    /// Hard stop: zero command applied immediately, bypassing slew.
    pub fn stop(&mut self) -> Result<()> {
        self.u_target = 0.0;
        self.u_applied = 0.0;
        self.write_neutral()
    }

    /// Disabling forces both channels low and freezes the applied command
    /// at zero.
    pub fn set_enabled(&mut self, enabled: bool) -> Result<()> {
        if self.enabled == enabled {
            return Ok(());
        }
        self.enabled = enabled;
        if !enabled {
            self.write_in1(0)?;
            self.write_in2(0)?;
            self.u_applied = 0.0;
            debug!("motor disabled");
        } else {
            debug!("motor enabled");
        }
        Ok(())
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn max_duty(&self) -> u32 {
        self.max_duty
    }

    pub fn duty_in1(&self) -> u32 {
        self.last_duty_in1
    }

    pub fn duty_in2(&self) -> u32 {
        self.last_duty_in2
    }

    /// Neutral per the configured policy.
    pub fn neutral(&mut self) -> Result<()> {
        self.write_neutral()
    }

    fn apply_outputs(&mut self, u: f32) -> Result<()> {
        if u == 0.0 {
            return self.write_neutral();
        }

        match self.cfg.drive_mode {
            DriveMode::SignMagnitude => {
                let duty = (u.abs() * self.max_duty as f32).round() as u32;
                let duty = duty.min(self.max_duty);
                if u > 0.0 {
                    self.write_in1(duty)?;
                    self.write_in2(0)
                } else {
                    self.write_in1(0)?;
                    self.write_in2(duty)
                }
            }
            DriveMode::LockedAntiPhase => {
                // Neutral is 50%/50%; u shifts the pair apart.
                let d1 = ((0.5 + 0.5 * u) * self.max_duty as f32).round() as u32;
                let d2 = ((0.5 - 0.5 * u) * self.max_duty as f32).round() as u32;
                self.write_in1(d1.min(self.max_duty))?;
                self.write_in2(d2.min(self.max_duty))
            }
        }
    }

    fn write_neutral(&mut self) -> Result<()> {
        match self.cfg.neutral_mode {
            NeutralMode::Coast => {
                self.write_in1(0)?;
                self.write_in2(0)
            }
            NeutralMode::Brake => {
                // Both sides high shorts the motor terminals on an IBT-4
                // style bridge.
                self.write_in1(self.max_duty)?;
                self.write_in2(self.max_duty)
            }
        }
    }

    fn write_in1(&mut self, duty: u32) -> Result<()> {
        self.last_duty_in1 = duty;
        self.pwm
            .write_in1(duty)
            .map_err(|e| eyre::Report::new(map_hw_error(&*e)))
            .wrap_err("write IN1")
    }

    fn write_in2(&mut self, duty: u32) -> Result<()> {
        self.last_duty_in2 = duty;
        self.pwm
            .write_in2(duty)
            .map_err(|e| eyre::Report::new(map_hw_error(&*e)))
            .wrap_err("write IN2")
    }
}

/// Symmetric deadband, then remap the remainder onto [min_out, 1] so the
/// first commanded step already overcomes stiction.
fn apply_deadband_min(x: f32, deadband: f32, min_out: f32) -> f32 {
    if x.abs() < deadband {
        return 0.0;
    }
    let s = ((x.abs() - deadband) / (1.0 - deadband)).clamp(0.0, 1.0);
    let y = min_out + (1.0 - min_out) * s;
    if x >= 0.0 {
        y
    } else {
        -y
    }
}
