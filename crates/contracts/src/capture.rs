//! Capture outcomes
//!
//! `CaptureError` is what a capture run ends with when it does not reach its
//! frame budget. The numeric codes are stable and used by the CLI as exit
//! statuses.

use std::time::Duration;

use thiserror::Error;

use crate::DeviceId;

/// Why a capture run lost synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncLoss {
    /// No sync point was found within the no-sync window
    #[error("no sync point for {elapsed:?}")]
    TooLongSinceSync { elapsed: Duration },

    /// Fresh frames drifted further apart than the no-sync window
    #[error("frames drifted {spread:?} apart")]
    Drift { spread: Duration },

    /// No device became readable within the no-sync window
    #[error("waited too long for a frame")]
    WaitTimedOut,

    /// The readiness wait itself failed
    #[error("readiness wait failed: {message}")]
    WaitFailed { message: String },

    /// Exchanging a buffer with the driver failed
    #[error("buffer swap failed on device {device}: {message}")]
    SwapFailed { device: DeviceId, message: String },
}

impl SyncLoss {
    /// Short label used as a metrics dimension.
    pub fn reason(&self) -> &'static str {
        match self {
            SyncLoss::TooLongSinceSync { .. } => "too_long_since_sync",
            SyncLoss::Drift { .. } => "drift",
            SyncLoss::WaitTimedOut => "wait_timed_out",
            SyncLoss::WaitFailed { .. } => "wait_failed",
            SyncLoss::SwapFailed { .. } => "swap_failed",
        }
    }
}

/// Result of testing a frame set for synchrony.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// All frames are fresh and inside the in-sync window
    InSync,
    /// Keep waiting for more frames
    NotYet,
    /// The run cannot recover
    Lost(SyncLoss),
}

impl SyncStatus {
    pub fn is_in_sync(&self) -> bool {
        matches!(self, SyncStatus::InSync)
    }
}

/// Terminal state of a capture run that did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("capture already in progress")]
    Busy,

    #[error("no frame callback registered")]
    NoCallback,

    #[error("capture halted")]
    Halted,

    #[error("no devices registered")]
    NoDevices,

    #[error("synchronization lost: {0}")]
    SyncLost(SyncLoss),

    #[error("undefined capture state")]
    Undefined,
}

impl CaptureError {
    /// Stable numeric code of the outcome.
    pub fn code(&self) -> i32 {
        match self {
            CaptureError::Undefined => -6,
            CaptureError::NoCallback => -5,
            CaptureError::SyncLost(_) => -4,
            CaptureError::Busy => -3,
            CaptureError::NoDevices => -2,
            CaptureError::Halted => -1,
        }
    }

    /// Short label used as a metrics dimension.
    pub fn outcome(&self) -> &'static str {
        match self {
            CaptureError::Busy => "busy",
            CaptureError::NoCallback => "no_callback",
            CaptureError::Halted => "halted",
            CaptureError::NoDevices => "no_devices",
            CaptureError::SyncLost(_) => "sync_lost",
            CaptureError::Undefined => "undefined",
        }
    }
}

impl From<SyncLoss> for CaptureError {
    fn from(loss: SyncLoss) -> Self {
        CaptureError::SyncLost(loss)
    }
}
