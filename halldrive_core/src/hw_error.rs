//! Maps `Box<dyn Error>` from trait boundaries to typed `DriveError`.
//!
//! The traits in `halldrive_traits` use `Box<dyn Error + Send + Sync>` for
//! maximum flexibility; this module converts those to our typed error enum,
//! downcasting `halldrive_hardware::HwError` when possible.

use crate::error::DriveError;
use halldrive_hardware::error::HwError;

/// Map a trait-boundary error to a typed `DriveError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to a string-based classification.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> DriveError {
    if let Some(hw) = e.downcast_ref::<HwError>() {
        return match hw {
            HwError::Store(s) => DriveError::Store(s.clone()),
            HwError::Io(io) => DriveError::Store(io.to_string()),
            other => DriveError::HardwareFault(other.to_string()),
        };
    }

    let s = e.to_string();
    if s.to_lowercase().contains("store") {
        DriveError::Store(s)
    } else {
        DriveError::Hardware(s)
    }
}
