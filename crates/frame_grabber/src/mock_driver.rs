//! Mock capture driver
//!
//! Implements `CaptureDriver` without hardware. Each device free-runs on its
//! own schedule from the moment streaming starts; a frame is delivered once
//! its due time has passed and a buffer is queued, and it is stamped with
//! the due time. Used for testing and for the CLI's mock mode.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use contracts::{BufferDescriptor, DeviceId, MockDriverConfig, Timestamp};
use tracing::{debug, trace};

use crate::device::Device;
use crate::driver::CaptureDriver;
use crate::error::{DriverError, Result};

/// Frame schedule of one mock device.
#[derive(Debug, Clone)]
pub struct MockSchedule {
    /// Frame period
    pub period: Duration,
    /// Offset of the first frame from stream start
    pub phase: Duration,
    /// Extra delay per frame, applied cyclically
    pub jitter: Vec<Duration>,
    /// Image bytes per buffer
    pub frame_bytes: usize,
    /// Fail `init`
    pub fail_init: bool,
    /// Fail `stream_on`
    pub fail_stream_on: bool,
    /// Fail the dequeue of this frame sequence
    pub fail_dequeue_at: Option<u32>,
}

impl Default for MockSchedule {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(40),
            phase: Duration::ZERO,
            jitter: Vec::new(),
            frame_bytes: 768 * 576,
            fail_init: false,
            fail_stream_on: false,
            fail_dequeue_at: None,
        }
    }
}

impl MockSchedule {
    /// Schedule with the given period and phase.
    pub fn new(period: Duration, phase: Duration) -> Self {
        Self {
            period,
            phase,
            ..Default::default()
        }
    }

    /// Build from the blueprint's driver section and a device phase.
    pub fn from_config(config: &MockDriverConfig, phase_ms: f64) -> Self {
        Self {
            period: millis(config.period_ms),
            phase: millis(phase_ms),
            jitter: config.jitter_ms.iter().copied().map(millis).collect(),
            frame_bytes: config.frame_bytes,
            ..Default::default()
        }
    }

    fn due(&self, started_at: Timestamp, sequence: u32) -> Timestamp {
        let jitter = if self.jitter.is_empty() {
            Duration::ZERO
        } else {
            self.jitter[sequence as usize % self.jitter.len()]
        };
        started_at + self.phase + self.period * sequence + jitter
    }
}

fn millis(ms: f64) -> Duration {
    if ms.is_finite() && ms > 0.0 {
        Duration::from_nanos((ms * 1_000_000.0).round() as u64)
    } else {
        Duration::ZERO
    }
}

/// A driver request, as recorded by `MockDriver`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockCall {
    Init(DeviceId),
    Uninit(DeviceId),
    StreamOn(DeviceId),
    StreamOff(DeviceId),
    Queue(DeviceId, u32),
    Dequeue(DeviceId, u32),
}

struct MockStream {
    schedule: MockSchedule,
    started_at: Option<Timestamp>,
    next_sequence: u32,
    queued: VecDeque<u32>,
    dropped: u32,
}

/// Mock driver
pub struct MockDriver {
    default_schedule: MockSchedule,
    schedules: HashMap<PathBuf, MockSchedule>,
    streams: HashMap<DeviceId, MockStream>,
    calls: Vec<MockCall>,
    idle_wait: Duration,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    /// Create mock driver with the default schedule for every device
    pub fn new() -> Self {
        Self {
            default_schedule: MockSchedule::default(),
            schedules: HashMap::new(),
            streams: HashMap::new(),
            calls: Vec::new(),
            idle_wait: Duration::from_millis(1),
        }
    }

    /// Schedule for devices without their own.
    pub fn with_default_schedule(mut self, schedule: MockSchedule) -> Self {
        self.default_schedule = schedule;
        self
    }

    /// Schedule for the device registered under `path`.
    pub fn with_schedule(mut self, path: impl Into<PathBuf>, schedule: MockSchedule) -> Self {
        self.schedules.insert(path.into(), schedule);
        self
    }

    /// How long a dequeue with nothing due may block.
    pub fn with_idle_wait(mut self, idle_wait: Duration) -> Self {
        self.idle_wait = idle_wait;
        self
    }

    pub fn set_schedule(&mut self, path: impl Into<PathBuf>, schedule: MockSchedule) {
        self.schedules.insert(path.into(), schedule);
    }

    /// Requests received so far, oldest first.
    pub fn calls(&self) -> &[MockCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn is_streaming(&self, id: DeviceId) -> bool {
        self.streams
            .get(&id)
            .is_some_and(|stream| stream.started_at.is_some())
    }

    /// Frames that fell due while no buffer was queued.
    pub fn dropped(&self, id: DeviceId) -> u32 {
        self.streams.get(&id).map_or(0, |stream| stream.dropped)
    }

    fn schedule_for(&self, path: &Path) -> MockSchedule {
        self.schedules
            .get(path)
            .cloned()
            .unwrap_or_else(|| self.default_schedule.clone())
    }

    fn stream_mut(&mut self, device: &Device) -> Result<(DeviceId, &mut MockStream)> {
        let id = device.id().ok_or_else(|| DriverError::not_open(device.path()))?;
        let stream = self
            .streams
            .get_mut(&id)
            .ok_or_else(|| DriverError::Other(format!("{} is not initialised", device.name())))?;
        Ok((id, stream))
    }
}

impl CaptureDriver for MockDriver {
    fn init(&mut self, device: &mut Device) -> Result<()> {
        let id = device.id().ok_or_else(|| DriverError::not_open(device.path()))?;
        let schedule = self.schedule_for(device.path());
        self.calls.push(MockCall::Init(id));

        if schedule.fail_init {
            return Err(DriverError::Other(format!(
                "{}: injected init failure",
                device.name()
            )));
        }

        let count = device.buffer_count();
        let pool = device.buffers_mut();
        pool.allocate(count as usize);
        for slot in 0..count {
            pool.set(slot, Box::new(Bytes::from(vec![slot as u8; schedule.frame_bytes])));
        }

        debug!(device_id = %id, buffers = count, period = ?schedule.period, "mock device initialised");
        self.streams.insert(
            id,
            MockStream {
                schedule,
                started_at: None,
                next_sequence: 0,
                queued: VecDeque::new(),
                dropped: 0,
            },
        );
        Ok(())
    }

    fn uninit(&mut self, device: &mut Device) -> Result<()> {
        let id = device.id().ok_or_else(|| DriverError::not_open(device.path()))?;
        self.calls.push(MockCall::Uninit(id));
        self.streams.remove(&id);
        device.buffers_mut().release();
        Ok(())
    }

    fn stream_on(&mut self, device: &Device) -> Result<()> {
        let now = self.now();
        let name = device.name();
        let (id, stream) = self.stream_mut(device)?;

        if stream.schedule.fail_stream_on {
            return Err(DriverError::Other(format!(
                "{name}: injected stream-on failure"
            )));
        }

        stream.started_at = Some(now);
        stream.next_sequence = 0;
        self.calls.push(MockCall::StreamOn(id));
        Ok(())
    }

    fn stream_off(&mut self, device: &Device) -> Result<()> {
        let (id, stream) = self.stream_mut(device)?;
        stream.started_at = None;
        stream.queued.clear();
        self.calls.push(MockCall::StreamOff(id));
        Ok(())
    }

    fn queue_buffer(&mut self, device: &Device, slot: u32) -> Result<()> {
        let (id, stream) = self.stream_mut(device)?;
        stream.queued.push_back(slot);
        self.calls.push(MockCall::Queue(id, slot));
        Ok(())
    }

    fn dequeue_buffer(&mut self, device: &Device) -> Result<Option<BufferDescriptor>> {
        let now = self.now();
        let idle_wait = self.idle_wait;
        let path = device.path().to_path_buf();
        let (id, stream) = self.stream_mut(device)?;

        let Some(started_at) = stream.started_at else {
            return Err(DriverError::NotStreaming { path });
        };

        if stream.queued.is_empty() {
            while stream.schedule.due(started_at, stream.next_sequence) <= now {
                stream.next_sequence += 1;
                stream.dropped += 1;
            }
            return Ok(None);
        }

        let sequence = stream.next_sequence;
        let due = stream.schedule.due(started_at, sequence);
        if due > now {
            thread::sleep(due.saturating_since(now).min(idle_wait));
            return Ok(None);
        }

        if stream.schedule.fail_dequeue_at == Some(sequence) {
            return Err(DriverError::request(
                "dequeue",
                std::io::Error::from_raw_os_error(libc::EIO),
            ));
        }

        let Some(slot) = stream.queued.pop_front() else {
            return Ok(None);
        };
        stream.next_sequence += 1;
        self.calls.push(MockCall::Dequeue(id, slot));
        trace!(device_id = %id, slot, sequence, timestamp = %due, "mock frame");

        Ok(Some(BufferDescriptor::new(slot, due, sequence)))
    }
}
