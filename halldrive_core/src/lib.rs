#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Differential-drive control core (hardware-agnostic).
//!
//! Closed-loop control for a two-wheeled robot with low-resolution Hall
//! encoders. All hardware interactions go through `halldrive_traits`
//! (`PwmPair`, `KvStore`, `Clock`), so the whole stack runs and tests
//! off-target.
//!
//! ## Architecture
//!
//! - **PulseCapture**: ISR-safe tick stream with software debounce
//! - **SectorCalibrator**: dual per-direction LUTs, circular-pattern
//!   alignment, persistence (`calibrator` module)
//! - **VelocityEstimator**: sector-indexed period correction + EMA
//! - **PidVel**: incremental (velocity-form) PID, optional parallel PIDF
//! - **MotorPwm**: signed command to two-channel PWM with deadband, slew
//!   and minimum-output mapping
//! - **Wheel** / **DifferentialDrive**: one wheel, then two, with
//!   coordinated calibration/alignment by spin-in-place
//! - **TrajectoryRunner**: rotate-then-advance trapezoidal maneuvers

pub mod builder;
pub mod calibrator;
pub mod drive;
pub mod error;
pub mod estimator;
pub mod hw_error;
pub mod mocks;
pub mod motor;
pub mod pid;
pub mod pulse;
pub mod trajectory;
pub mod util;
pub mod wheel;

pub use builder::WheelBuilder;
pub use calibrator::{CalibratorCfg, LutDir, SectorCalibrator};
pub use drive::{DifferentialDrive, DriveCfg};
pub use error::{BuildError, DriveError, StartError};
pub use estimator::{EncoderCfg, VelocityEstimator};
pub use motor::{DriveMode, MotorCfg, MotorPwm, NeutralMode};
pub use pid::{Discretization, PidCfg, PidVel};
pub use pulse::{PulseCapture, PulseIsr, PulseSnapshot};
pub use trajectory::{TrajectoryCfg, TrajectoryRunner};
pub use wheel::{Wheel, WheelCfg};
