//! Frames and frame sets.

use std::collections::BTreeMap;
use std::time::Duration;

use contracts::{BufferDescriptor, DeviceId, Timestamp};
use frame_grabber::Device;
use tracing::trace;

/// The most recent capture of one device.
///
/// A frame refers to its device by id and to its image by buffer slot; it
/// owns neither. Synthetic frames stand in for devices that have not
/// delivered anything yet and carry no image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    device: DeviceId,
    slot: Option<u32>,
    timestamp: Timestamp,
    sequence: u32,
    used: bool,
}

impl Frame {
    /// Frame for a buffer just dequeued from `device`.
    pub fn from_descriptor(device: DeviceId, descriptor: &BufferDescriptor) -> Self {
        Self {
            device,
            slot: Some(descriptor.slot),
            timestamp: descriptor.timestamp,
            sequence: descriptor.sequence,
            used: false,
        }
    }

    /// Placeholder for a device without a captured frame. Starts used, so
    /// it can never complete a sync point.
    pub fn synthetic(device: DeviceId, now: Timestamp) -> Self {
        Self {
            device,
            slot: None,
            timestamp: now,
            sequence: 0,
            used: true,
        }
    }

    /// Image bytes, resolved through the owning device's buffer pool.
    pub fn image<'d>(&self, device: &'d Device) -> Option<&'d [u8]> {
        device.buffers().start(self.slot?)
    }

    pub fn mark_used(&mut self) {
        self.used = true;
    }

    pub fn device_id(&self) -> DeviceId {
        self.device
    }

    pub fn slot(&self) -> Option<u32> {
        self.slot
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn is_used(&self) -> bool {
        self.used
    }

    pub fn is_synthetic(&self) -> bool {
        self.slot.is_none()
    }
}

/// One frame per registered device, ordered by device id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameSet {
    frames: BTreeMap<DeviceId, Frame>,
}

impl FrameSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Frame> {
        self.frames.values_mut()
    }

    pub fn get(&self, device: DeviceId) -> Option<&Frame> {
        self.frames.get(&device)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn device_ids(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.frames.keys().copied()
    }

    /// Replace the frame of the frame's device, returning the previous one.
    pub fn insert(&mut self, frame: Frame) -> Option<Frame> {
        self.frames.insert(frame.device, frame)
    }

    pub(crate) fn remove(&mut self, device: DeviceId) -> Option<Frame> {
        self.frames.remove(&device)
    }

    /// Largest timestamp difference within the set.
    pub fn spread(&self) -> Duration {
        let mut timestamps = self.frames.values().map(Frame::timestamp);
        let Some(first) = timestamps.next() else {
            return Duration::ZERO;
        };
        let (min, max) = timestamps.fold((first, first), |(min, max), t| (min.min(t), max.max(t)));
        max.saturating_since(min)
    }

    /// Match the set to `devices`: keep frames of devices still present,
    /// synthesize frames for new devices and drop frames of removed ones.
    pub fn refresh(&mut self, devices: &BTreeMap<DeviceId, Device>, now: Timestamp) {
        self.frames.retain(|id, _| devices.contains_key(id));
        for &id in devices.keys() {
            self.frames.entry(id).or_insert_with(|| {
                trace!(device_id = %id, "synthetic frame");
                Frame::synthetic(id, now)
            });
        }
    }
}

impl<'a> IntoIterator for &'a FrameSet {
    type Item = &'a Frame;
    type IntoIter = std::collections::btree_map::Values<'a, DeviceId, Frame>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.values()
    }
}
