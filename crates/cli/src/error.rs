//! Error types for CLI operations.

use std::path::PathBuf;

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Neither a configuration file nor `--device` given
    #[error("No devices given: pass --device or --config")]
    NoDevices,

    /// Driver not compiled into this binary
    #[error("Driver '{driver}' is not available in this build (enable the '{feature}' feature)")]
    DriverUnavailable {
        driver: &'static str,
        feature: &'static str,
    },

    /// Device registration failed
    #[error("Failed to register {path}: {message}")]
    Registration { path: PathBuf, message: String },

    /// Every run ended without completing
    #[error("No capture run completed ({runs} runs)")]
    NoCompletedRun { runs: u64 },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn registration(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Registration {
            path: path.into(),
            message: message.into(),
        }
    }
}
