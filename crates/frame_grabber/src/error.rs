//! Frame grabber error types

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Buffer slot hand-off violation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotError {
    #[error("slot {index} out of range (pool has {len} slots)")]
    OutOfRange { index: u32, len: usize },

    #[error("slot {index} is already queued with the driver")]
    AlreadyQueued { index: u32 },

    #[error("slot {index} is not queued with the driver")]
    NotQueued { index: u32 },
}

/// Device handle error
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Path is missing or not a character device
    #[error("'{}' is not a character device", path.display())]
    NotADevice { path: PathBuf },

    /// Opening the device node failed
    #[error("cannot open '{}': {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Capture driver error
#[derive(Debug, Error)]
pub enum DriverError {
    /// Device handle is not open
    #[error("device '{}' is not open", path.display())]
    NotOpen { path: PathBuf },

    /// Device lacks a required capability
    #[error("'{}' does not support {capability}", path.display())]
    Unsupported {
        path: PathBuf,
        capability: &'static str,
    },

    /// Driver granted fewer buffers than usable
    #[error("insufficient buffer memory: requested {requested}, granted {granted}")]
    InsufficientBuffers { requested: u32, granted: u32 },

    /// Driver request failed
    #[error("{op} failed: {source}")]
    Request {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// Stream was used before it was started
    #[error("device '{}' is not streaming", path.display())]
    NotStreaming { path: PathBuf },

    /// Slot ownership violation
    #[error(transparent)]
    Slot(#[from] SlotError),

    /// Other driver failure
    #[error("{0}")]
    Other(String),
}

impl DriverError {
    /// Create driver request error
    pub fn request(op: &'static str, source: io::Error) -> Self {
        Self::Request { op, source }
    }

    pub fn not_open(path: impl Into<PathBuf>) -> Self {
        Self::NotOpen { path: path.into() }
    }
}

/// Result alias
pub type Result<T> = std::result::Result<T, DriverError>;
