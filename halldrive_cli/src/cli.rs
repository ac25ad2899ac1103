//! CLI argument definitions.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum Side {
    Right,
    Left,
    /// Both wheels through the coordinated spin-in-place routine.
    Both,
}

#[derive(Parser, Debug)]
#[command(name = "halldrive", version, about = "Differential-drive controller shell (simulation)")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/halldrive.toml")]
    pub config: PathBuf,

    /// Directory holding the per-wheel persistence namespaces
    #[arg(long, value_name = "DIR", default_value = "state")]
    pub state_dir: PathBuf,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Drive a constant twist for a while and report wheel speeds
    Drive {
        /// Linear velocity, m/s
        #[arg(long, default_value_t = 0.3)]
        v: f32,
        /// Angular velocity, rad/s
        #[arg(long, default_value_t = 0.0)]
        w: f32,
        /// Simulated run time, seconds
        #[arg(long, default_value_t = 3.0)]
        secs: f32,
    },
    /// Spin in place at a constant angular velocity
    Spin {
        /// Angular velocity, rad/s
        #[arg(long, default_value_t = 2.0)]
        w: f32,
        /// Simulated run time, seconds
        #[arg(long, default_value_t = 3.0)]
        secs: f32,
    },
    /// Rotate toward and then advance to a point in the robot frame
    Goto {
        /// Target x in the robot frame, m
        #[arg(long)]
        x: f32,
        /// Target y in the robot frame, m
        #[arg(long)]
        y: f32,
    },
    /// Learn a per-sector LUT over N laps
    Calibrate {
        #[arg(long, value_enum, default_value_t = Side::Both)]
        side: Side,
        #[arg(long, default_value_t = 3)]
        laps: u8,
    },
    /// Re-learn the pattern offset over N laps (needs a calibrated LUT)
    Align {
        #[arg(long, value_enum, default_value_t = Side::Both)]
        side: Side,
        #[arg(long, default_value_t = 3)]
        laps: u8,
    },
    /// Print the stored LUTs, offsets and use flags
    ShowLut {
        #[arg(long, value_enum, default_value_t = Side::Right)]
        side: Side,
    },
    /// Quick health check of the simulated rig
    SelfCheck,
}
