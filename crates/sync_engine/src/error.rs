//! Sync engine error types

use std::path::PathBuf;

use contracts::DeviceId;
use frame_grabber::{DeviceError, DriverError};
use thiserror::Error;

/// Device registration error
///
/// Registration failures leave the engine untouched; the candidate device
/// is closed before the error is returned.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// Path is missing or not a character device
    #[error("'{}' is not a capture device", path.display())]
    NotADevice { path: PathBuf },

    /// Device node could not be opened
    #[error(transparent)]
    Open(#[from] DeviceError),

    /// Driver initialisation failed
    #[error("failed to initialise '{}': {source}", path.display())]
    Init {
        path: PathBuf,
        #[source]
        source: DriverError,
    },

    /// Streaming could not be started
    #[error("failed to start capture on '{}': {source}", path.display())]
    Start {
        path: PathBuf,
        #[source]
        source: DriverError,
    },

    /// No device is registered under this id
    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),
}

/// Result alias
pub type Result<T> = std::result::Result<T, RegistrationError>;
