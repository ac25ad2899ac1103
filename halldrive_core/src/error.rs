use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum DriveError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid state: {0}")]
    State(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing pwm pair")]
    MissingPwm,
    #[error("missing key-value store")]
    MissingStore,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

/// Why a calibration or alignment run refused to start. Local and
/// non-fatal: nothing changed, the caller may retry with better arguments.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StartError {
    #[error("lap count is zero or exceeds the configured maximum")]
    InvalidLaps,
    #[error("pattern for the requested direction is not ready")]
    PatternNotReady,
    #[error("a routine of this kind is already running")]
    Busy,
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
