//! Sync window test.

use std::time::Duration;

use contracts::{SyncEngineConfig, SyncLoss, SyncStatus, Timestamp};

use crate::frame::FrameSet;

/// Skew limits of a capture run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
    /// Spread below which frames are the same instant
    pub in_sync: Duration,
    /// Spread, or time since the last sync point, that ends the run
    pub no_sync: Duration,
}

impl SyncWindow {
    pub fn new(in_sync: Duration, no_sync: Duration) -> Self {
        Self { in_sync, no_sync }
    }
}

impl From<&SyncEngineConfig> for SyncWindow {
    fn from(config: &SyncEngineConfig) -> Self {
        Self::new(config.in_sync_window(), config.no_sync_window())
    }
}

/// Test `frames` for a sync point at time `now`.
///
/// Frames captured before `last_sync` are stale: they are marked used and
/// left out of the spread. Any used frame blocks the sync point, so every
/// device must deliver a fresh frame after each sync. On success all frames
/// are marked used and `last_sync` moves to `now`.
pub fn sync_test(
    frames: &mut FrameSet,
    now: Timestamp,
    last_sync: &mut Timestamp,
    window: &SyncWindow,
) -> SyncStatus {
    let elapsed = now.saturating_since(*last_sync);
    if elapsed > window.no_sync {
        tracing::warn!(?elapsed, no_sync = ?window.no_sync, "sync lost: too long since last sync");
        return SyncStatus::Lost(SyncLoss::TooLongSinceSync { elapsed });
    }

    if frames.is_empty() {
        return SyncStatus::NotYet;
    }

    let mut ready = true;
    let mut bounds: Option<(Timestamp, Timestamp)> = None;

    for frame in frames.iter_mut() {
        let timestamp = frame.timestamp();
        if timestamp < *last_sync {
            frame.mark_used();
        } else {
            bounds = Some(match bounds {
                Some((min, max)) => (min.min(timestamp), max.max(timestamp)),
                None => (timestamp, timestamp),
            });
        }
        ready &= !frame.is_used();
    }

    let spread = bounds.map_or(Duration::ZERO, |(min, max)| max.saturating_since(min));

    if ready && spread < window.in_sync {
        for frame in frames.iter_mut() {
            frame.mark_used();
        }
        *last_sync = now;
        tracing::trace!(?spread, frames = frames.len(), "sync point");
        SyncStatus::InSync
    } else if spread > window.no_sync {
        tracing::warn!(?spread, no_sync = ?window.no_sync, "sync lost: frames drifted apart");
        SyncStatus::Lost(SyncLoss::Drift { spread })
    } else {
        SyncStatus::NotYet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use contracts::{BufferDescriptor, DeviceId};

    fn window() -> SyncWindow {
        SyncWindow::new(Duration::from_millis(22), Duration::from_millis(168))
    }

    fn frames_at(times_ms: &[u64]) -> FrameSet {
        let mut set = FrameSet::new();
        for (i, &ms) in times_ms.iter().enumerate() {
            set.insert(Frame::from_descriptor(
                DeviceId::new(10 + i as i32),
                &BufferDescriptor::new(0, Timestamp::from_millis(ms), 0),
            ));
        }
        set
    }

    #[test]
    fn test_close_frames_are_in_sync() {
        let mut frames = frames_at(&[1000, 1005, 1008]);
        let mut last_sync = Timestamp::from_millis(990);
        let now = Timestamp::from_millis(1010);

        let status = sync_test(&mut frames, now, &mut last_sync, &window());

        assert_eq!(status, SyncStatus::InSync);
        assert!(frames.iter().all(Frame::is_used));
        assert_eq!(last_sync, now);
    }

    #[test]
    fn test_wide_spread_is_not_yet() {
        let mut frames = frames_at(&[1000, 1030]);
        let mut last_sync = Timestamp::from_millis(990);

        let status = sync_test(
            &mut frames,
            Timestamp::from_millis(1035),
            &mut last_sync,
            &window(),
        );

        assert_eq!(status, SyncStatus::NotYet);
        assert!(frames.iter().all(|f| !f.is_used()));
        assert_eq!(last_sync, Timestamp::from_millis(990));
    }

    #[test]
    fn test_too_long_since_sync_is_fatal() {
        // spreads stay small, but no sync point was reached in time
        let mut frames = frames_at(&[1000, 1001]);
        for frame in frames.iter_mut() {
            frame.mark_used();
        }
        let mut last_sync = Timestamp::from_millis(800);

        let status = sync_test(
            &mut frames,
            Timestamp::from_millis(1000),
            &mut last_sync,
            &window(),
        );

        assert!(matches!(
            status,
            SyncStatus::Lost(SyncLoss::TooLongSinceSync { elapsed }) if elapsed == Duration::from_millis(200)
        ));
    }

    #[test]
    fn test_drift_is_fatal() {
        let mut frames = frames_at(&[1000, 1170]);
        let mut last_sync = Timestamp::from_millis(1000);

        let status = sync_test(
            &mut frames,
            Timestamp::from_millis(1100),
            &mut last_sync,
            &window(),
        );

        assert_eq!(
            status,
            SyncStatus::Lost(SyncLoss::Drift {
                spread: Duration::from_millis(170)
            })
        );
    }

    #[test]
    fn test_stale_frame_blocks_and_is_excluded() {
        // the stale frame would put the spread over the no-sync window
        let mut frames = frames_at(&[700, 1000]);
        let mut last_sync = Timestamp::from_millis(990);

        let status = sync_test(
            &mut frames,
            Timestamp::from_millis(1005),
            &mut last_sync,
            &window(),
        );

        assert_eq!(status, SyncStatus::NotYet);
        let stale = frames.get(DeviceId::new(10)).unwrap();
        assert!(stale.is_used());
        assert!(!frames.get(DeviceId::new(11)).unwrap().is_used());
    }

    #[test]
    fn test_used_frame_blocks_sync() {
        let mut frames = frames_at(&[1000, 1002]);
        let mut last_sync = Timestamp::from_millis(990);
        sync_test(&mut frames, Timestamp::from_millis(1003), &mut last_sync, &window());

        // same frames again: already delivered
        let status = sync_test(
            &mut frames,
            Timestamp::from_millis(1010),
            &mut last_sync,
            &window(),
        );
        assert_eq!(status, SyncStatus::NotYet);
    }

    #[test]
    fn test_empty_set_never_syncs() {
        let mut frames = FrameSet::new();
        let mut last_sync = Timestamp::from_millis(990);

        let status = sync_test(
            &mut frames,
            Timestamp::from_millis(1000),
            &mut last_sync,
            &window(),
        );

        assert_eq!(status, SyncStatus::NotYet);
        assert_eq!(last_sync, Timestamp::from_millis(990));
    }
}
