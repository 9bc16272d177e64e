//! Capture driver abstraction
//!
//! The driver is the only component that talks to the hardware. The engine
//! calls the provided `enqueue`/`dequeue`/`start`/`stop` methods, which
//! keep the slot ownership of the device's pool in step with the driver's
//! queue; implementors supply the raw requests.

use contracts::{BufferDescriptor, Timestamp};
use tracing::warn;

use crate::device::Device;
use crate::error::Result;

/// Streaming capture driver.
pub trait CaptureDriver: Send {
    /// Negotiate capabilities and format, then size and map the device's
    /// buffer pool.
    fn init(&mut self, device: &mut Device) -> Result<()>;

    /// Undo `init`: unmap buffers and free driver resources.
    fn uninit(&mut self, device: &mut Device) -> Result<()>;

    fn stream_on(&mut self, device: &Device) -> Result<()>;

    fn stream_off(&mut self, device: &Device) -> Result<()>;

    /// Hand buffer `slot` to the hardware.
    fn queue_buffer(&mut self, device: &Device, slot: u32) -> Result<()>;

    /// Take the oldest filled buffer back, `Ok(None)` when none is ready.
    fn dequeue_buffer(&mut self, device: &Device) -> Result<Option<BufferDescriptor>>;

    /// Current time on the clock buffers are stamped with.
    fn now(&self) -> Timestamp {
        Timestamp::monotonic()
    }

    /// Queue `slot`, moving it to driver ownership.
    fn enqueue(&mut self, device: &mut Device, slot: u32) -> Result<()> {
        device.buffers_mut().hand_to_driver(slot)?;
        if let Err(e) = self.queue_buffer(device, slot) {
            // still ours, the driver never saw it
            device.buffers_mut().take_from_driver(slot)?;
            return Err(e);
        }
        Ok(())
    }

    /// Dequeue a filled buffer, moving its slot back to the application.
    fn dequeue(&mut self, device: &mut Device) -> Result<Option<BufferDescriptor>> {
        let Some(descriptor) = self.dequeue_buffer(device)? else {
            return Ok(None);
        };
        device.buffers_mut().take_from_driver(descriptor.slot)?;
        Ok(Some(descriptor))
    }

    /// Queue every slot, then start streaming.
    fn start(&mut self, device: &mut Device) -> Result<()> {
        for slot in 0..device.buffers().len() as u32 {
            self.enqueue(device, slot)?;
        }
        self.stream_on(device)
    }

    /// Stop streaming and reclaim every slot.
    fn stop(&mut self, device: &mut Device) -> Result<()> {
        let result = self.stream_off(device);
        if let Err(e) = &result {
            warn!(device = %device.name(), error = %e, "stream off failed");
        }
        device.buffers_mut().reclaim_all();
        result
    }
}

impl<D: CaptureDriver + ?Sized> CaptureDriver for Box<D> {
    fn init(&mut self, device: &mut Device) -> Result<()> {
        (**self).init(device)
    }

    fn uninit(&mut self, device: &mut Device) -> Result<()> {
        (**self).uninit(device)
    }

    fn stream_on(&mut self, device: &Device) -> Result<()> {
        (**self).stream_on(device)
    }

    fn stream_off(&mut self, device: &Device) -> Result<()> {
        (**self).stream_off(device)
    }

    fn queue_buffer(&mut self, device: &Device, slot: u32) -> Result<()> {
        (**self).queue_buffer(device, slot)
    }

    fn dequeue_buffer(&mut self, device: &Device) -> Result<Option<BufferDescriptor>> {
        (**self).dequeue_buffer(device)
    }

    fn now(&self) -> Timestamp {
        (**self).now()
    }
}
