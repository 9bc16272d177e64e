//! Sync engine configuration contracts that can be shared across crates.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ContractError;

/// Nominal PAL frame period in milliseconds.
pub const PAL_FRAME_PERIOD_MS: f64 = 40.0;

/// Sync engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncEngineConfig {
    /// Largest timestamp spread still considered the same instant (ms)
    pub in_sync_ms: f64,

    /// Spread, or time since the last sync point, that ends a run (ms)
    pub no_sync_ms: f64,

    /// How far before capture start the first sync point is assumed (ms)
    pub start_offset_ms: f64,

    /// Driver buffers per device
    pub buffer_count: u32,
}

impl Default for SyncEngineConfig {
    fn default() -> Self {
        Self {
            in_sync_ms: 21.0,
            no_sync_ms: 168.0,
            start_offset_ms: 84.0,
            buffer_count: 3,
        }
    }
}

impl SyncEngineConfig {
    pub fn in_sync_window(&self) -> Duration {
        millis(self.in_sync_ms)
    }

    pub fn no_sync_window(&self) -> Duration {
        millis(self.no_sync_ms)
    }

    pub fn start_offset(&self) -> Duration {
        millis(self.start_offset_ms)
    }

    /// Check window ordering and buffer count.
    pub fn validate(&self) -> Result<(), ContractError> {
        check_window("in_sync_ms", self.in_sync_ms)?;
        check_window("no_sync_ms", self.no_sync_ms)?;

        if !self.start_offset_ms.is_finite() || self.start_offset_ms < 0.0 {
            return Err(ContractError::config_validation(
                "start_offset_ms",
                format!("must be non-negative, got {}", self.start_offset_ms),
            ));
        }

        if self.in_sync_ms >= self.no_sync_ms {
            return Err(ContractError::config_validation(
                "in_sync_ms",
                format!(
                    "in-sync window ({}ms) must be smaller than no-sync window ({}ms)",
                    self.in_sync_ms, self.no_sync_ms
                ),
            ));
        }

        if self.buffer_count < 2 {
            return Err(ContractError::config_validation(
                "buffer_count",
                format!("at least 2 buffers are needed, got {}", self.buffer_count),
            ));
        }

        Ok(())
    }
}

fn check_window(field: &str, ms: f64) -> Result<(), ContractError> {
    if !ms.is_finite() || ms <= 0.0 {
        return Err(ContractError::config_validation(
            field,
            format!("must be positive, got {ms}"),
        ));
    }
    Ok(())
}

fn millis(ms: f64) -> Duration {
    if ms.is_finite() && ms > 0.0 {
        Duration::from_nanos((ms * 1_000_000.0).round() as u64)
    } else {
        Duration::ZERO
    }
}

/// Windows expressed as a number of frames plus a tolerance.
///
/// `duration = frames * frame_period * (1 + tolerance_percent / 100)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameTiming {
    pub frame_period_ms: f64,
    pub in_sync_frames: f64,
    pub no_sync_frames: f64,
    pub start_offset_frames: f64,
    pub tolerance_percent: f64,
}

impl Default for FrameTiming {
    fn default() -> Self {
        Self {
            frame_period_ms: PAL_FRAME_PERIOD_MS,
            in_sync_frames: 0.5,
            no_sync_frames: 4.0,
            start_offset_frames: 2.0,
            tolerance_percent: 5.0,
        }
    }
}

impl FrameTiming {
    /// Length of `frames` frame periods with the tolerance applied, in ms.
    ///
    /// Negative frame counts are treated as their magnitude.
    pub fn frame_time_ms(&self, frames: f64) -> f64 {
        frames.abs() * self.frame_period_ms * (1.0 + self.tolerance_percent / 100.0)
    }

    pub fn to_engine_config(&self, buffer_count: u32) -> SyncEngineConfig {
        SyncEngineConfig {
            in_sync_ms: self.frame_time_ms(self.in_sync_frames),
            no_sync_ms: self.frame_time_ms(self.no_sync_frames),
            start_offset_ms: self.frame_time_ms(self.start_offset_frames),
            buffer_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_windows() {
        let config = SyncEngineConfig::default();
        assert_eq!(config.in_sync_window(), Duration::from_millis(21));
        assert_eq!(config.no_sync_window(), Duration::from_millis(168));
        assert_eq!(config.start_offset(), Duration::from_millis(84));
        assert_eq!(config.buffer_count, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_windows() {
        let config = SyncEngineConfig {
            in_sync_ms: 200.0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.field(), Some("in_sync_ms"));
    }

    #[test]
    fn test_validate_rejects_single_buffer() {
        let config = SyncEngineConfig {
            buffer_count: 1,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.field(), Some("buffer_count"));
    }

    #[test]
    fn test_validate_rejects_non_positive_window() {
        let config = SyncEngineConfig {
            no_sync_ms: 0.0,
            ..Default::default()
        };
        assert_eq!(config.validate().unwrap_err().field(), Some("no_sync_ms"));
    }

    #[test]
    fn test_default_frame_timing_matches_engine_defaults() {
        let engine = FrameTiming::default().to_engine_config(3);
        assert!((engine.in_sync_ms - 21.0).abs() < 1e-9);
        assert!((engine.no_sync_ms - 168.0).abs() < 1e-9);
        assert!((engine.start_offset_ms - 84.0).abs() < 1e-9);
    }

    #[test]
    fn test_frame_time_ignores_sign() {
        let timing = FrameTiming {
            tolerance_percent: 0.0,
            ..Default::default()
        };
        assert!((timing.frame_time_ms(-2.5) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: SyncEngineConfig = serde_json::from_str(r#"{"in_sync_ms": 10.0}"#).unwrap();
        assert_eq!(config.in_sync_ms, 10.0);
        assert_eq!(config.no_sync_ms, 168.0);
    }
}
