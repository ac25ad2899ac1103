//! Typed TOML configuration for a whole robot: two wheels (pins, encoder,
//! motor, PID, calibrator) plus the drive geometry and logging. Values
//! mirror the core's config structs; `validate()` enforces the same ranges
//! the core builder checks so a bad file fails before any hardware is
//! touched.

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid configuration: {0}")]
pub struct ValidationError(pub String);

#[derive(Debug, Deserialize)]
pub struct WheelPins {
    /// Hall sensor input.
    pub pulse: u8,
    /// H-bridge inputs.
    pub in1: u8,
    pub in2: u8,
}

#[derive(Debug, Deserialize)]
pub struct Pins {
    pub right: WheelPins,
    pub left: WheelPins,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EncoderCfg {
    pub ppr: u16,
    pub count_rising: bool,
    pub invert: bool,
    pub glitch_cycles: u16,
    pub min_gap_us: u32,
    pub alpha_period: f32,
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

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NeutralMode {
    Coast,
    Brake,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DriveMode {
    SignMagnitude,
    LockedAntiPhase,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MotorCfg {
    pub freq_hz: u32,
    pub resolution_bits: u8,
    pub invert: bool,
    pub deadband: f32,
    pub min_output: f32,
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

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PidMode {
    Incremental,
    ParallelPidf,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PidCfg {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    pub tf: f32,
    pub ts: f32,
    pub u_min: f32,
    pub u_max: f32,
    pub clamp: bool,
    pub mode: PidMode,
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
            clamp: true,
            mode: PidMode::Incremental,
            anti_windup: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WheelCfg {
    pub assist_enabled: bool,
    pub assist_u: f32,
    pub dir_eps_u: f32,
    pub dir_hold_ms: u64,
    pub auto_align_on_boot: bool,
    pub align_laps_boot: u8,
}

impl Default for WheelCfg {
    fn default() -> Self {
        Self {
            assist_enabled: true,
            assist_u: 0.5,
            dir_eps_u: 0.05,
            dir_hold_ms: 200,
            auto_align_on_boot: true,
            align_laps_boot: 3,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DriveCfg {
    pub wheel_radius: f32,
    pub track_width: f32,
    pub v_max: f32,
    pub w_max: f32,
    pub clamp_twist: bool,
    pub v_acc_max: f32,
    pub w_acc_max: f32,
    pub omega_wheel_max: f32,
    pub rescale_twist_to_wheel_limit: bool,
    pub auto_coordinated_align_on_boot: bool,
    pub align_laps_boot: u8,
    pub align_assist_w: f32,
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

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CalibratorCfg {
    pub max_laps: u8,
    pub use_lut_by_default: bool,
}

impl Default for CalibratorCfg {
    fn default() -> Self {
        Self {
            max_laps: 12,
            use_lut_by_default: true,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub pins: Pins,
    #[serde(default)]
    pub encoder: EncoderCfg,
    #[serde(default)]
    pub motor: MotorCfg,
    #[serde(default)]
    pub pid: PidCfg,
    #[serde(default)]
    pub wheel: WheelCfg,
    #[serde(default)]
    pub drive: DriveCfg,
    #[serde(default)]
    pub calibrator: CalibratorCfg,
    #[serde(default)]
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    /// Range checks matching the core builder, so a bad file is rejected
    /// before any hardware is touched.
    pub fn validate(&self) -> Result<(), ValidationError> {
        fn fail(msg: &str) -> Result<(), ValidationError> {
            Err(ValidationError(msg.to_string()))
        }

        if self.encoder.ppr == 0 {
            return fail("encoder.ppr must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.encoder.alpha_period) || !self.encoder.alpha_period.is_finite()
        {
            return fail("encoder.alpha_period must be within [0, 1]");
        }
        if self.pid.ts <= 0.0 || !self.pid.ts.is_finite() {
            return fail("pid.ts must be > 0");
        }
        if self.pid.u_min > self.pid.u_max {
            return fail("pid.u_min must not exceed pid.u_max");
        }
        if !(1u8..=16).contains(&self.motor.resolution_bits) {
            return fail("motor.resolution_bits must be within 1..=16");
        }
        if self.motor.freq_hz == 0 {
            return fail("motor.freq_hz must be > 0");
        }
        if !(0.0..0.5).contains(&self.motor.deadband) {
            return fail("motor.deadband must be within [0, 0.5)");
        }
        if !(0.0..=0.95).contains(&self.motor.min_output) {
            return fail("motor.min_output must be within [0, 0.95]");
        }
        if self.calibrator.max_laps == 0 || self.calibrator.max_laps > 12 {
            return fail("calibrator.max_laps must be within 1..=12");
        }
        if !(0.0..=1.0).contains(&self.wheel.assist_u) {
            return fail("wheel.assist_u must be within [0, 1]");
        }
        if self.wheel.auto_align_on_boot
            && (self.wheel.align_laps_boot == 0
                || self.wheel.align_laps_boot > self.calibrator.max_laps)
        {
            return fail("wheel.align_laps_boot must be within 1..=calibrator.max_laps");
        }
        if self.drive.wheel_radius <= 0.0 {
            return fail("drive.wheel_radius must be > 0");
        }
        if self.drive.track_width <= 0.0 {
            return fail("drive.track_width must be > 0");
        }
        if self.drive.auto_coordinated_align_on_boot
            && (self.drive.align_laps_boot == 0
                || self.drive.align_laps_boot > self.calibrator.max_laps)
        {
            return fail("drive.align_laps_boot must be within 1..=calibrator.max_laps");
        }
        if let Some(rotation) = self.logging.rotation.as_deref() {
            if !matches!(rotation, "never" | "daily" | "hourly") {
                return fail("logging.rotation must be one of never|daily|hourly");
            }
        }
        Ok(())
    }
}
