//! Main sync engine implementation.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use contracts::{CaptureError, DeviceId, SyncEngineConfig, SyncLoss, SyncStatus, Timestamp};
use frame_grabber::{CaptureDriver, Device, UserData};
use observability::metrics::{
    record_capture_result, record_device_count, record_frame_swapped, record_registration,
    record_sync_loss, record_sync_point,
};
use tracing::{debug, info, instrument, warn};

use crate::error::RegistrationError;
use crate::frame::{Frame, FrameSet};
use crate::readiness::{wait_readable, Readiness};
use crate::window::{sync_test, SyncWindow};

/// Called with every synchronized frame set.
///
/// The callback may register or deregister devices, halt the capture or
/// replace itself; it must not expect `capture` to run re-entrantly.
pub type FrameCallback<D> = Box<dyn FnMut(&mut SyncEngine<D>, &FrameSet) + Send>;

/// Requests a running capture to stop from any thread.
#[derive(Debug, Clone)]
pub struct HaltHandle(Arc<AtomicBool>);

impl HaltHandle {
    /// Stop the capture at the start of its next iteration.
    pub fn halt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_pending(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Multi-device synchronization engine
pub struct SyncEngine<D: CaptureDriver> {
    /// Capture driver shared by all devices
    driver: D,
    /// Configuration
    config: SyncEngineConfig,
    /// Registered devices
    devices: BTreeMap<DeviceId, Device>,
    /// Latest frame per device
    frames: FrameSet,
    /// User callback
    callback: Option<FrameCallback<D>>,
    /// A capture is running
    busy: bool,
    /// Halt requested
    halt: Arc<AtomicBool>,
    /// Devices changed since `frames` was built
    needs_frame_refresh: bool,
    /// Deregistered ids whose frames must not be carried over
    retired: Vec<DeviceId>,
    /// Time of the last sync point
    last_sync: Timestamp,
}

impl<D: CaptureDriver> SyncEngine<D> {
    /// Create an engine with the default windows
    pub fn new(driver: D) -> Self {
        Self::with_config(driver, SyncEngineConfig::default())
    }

    /// Create an engine with the given configuration
    pub fn with_config(driver: D, config: SyncEngineConfig) -> Self {
        debug!(
            in_sync = ?config.in_sync_window(),
            no_sync = ?config.no_sync_window(),
            start_offset = ?config.start_offset(),
            buffers = config.buffer_count,
            "sync engine created"
        );
        Self {
            driver,
            config,
            devices: BTreeMap::new(),
            frames: FrameSet::new(),
            callback: None,
            busy: false,
            halt: Arc::new(AtomicBool::new(false)),
            needs_frame_refresh: false,
            retired: Vec::new(),
            last_sync: Timestamp::ZERO,
        }
    }

    /// Install the frame set callback, replacing any previous one.
    pub fn register_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut SyncEngine<D>, &FrameSet) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    /// Open, initialise and start the device at `path`.
    ///
    /// Registering a device that is already registered, under any path,
    /// returns the existing id and drops `user_data`.
    #[instrument(
        level = "debug",
        name = "sync_engine_register",
        skip(self, path, user_data),
        fields(path = %path.as_ref().display())
    )]
    pub fn register_device(
        &mut self,
        path: impl AsRef<Path>,
        user_data: Option<UserData>,
    ) -> Result<DeviceId, RegistrationError> {
        let path = path.as_ref();
        let mut candidate = Device::open(path, self.config.buffer_count, user_data);

        if !candidate.is_valid() {
            warn!("refusing to register invalid device");
            return Err(RegistrationError::NotADevice {
                path: path.to_path_buf(),
            });
        }

        if let Some((&id, _)) = self
            .devices
            .iter()
            .find(|(_, device)| device.same_hardware(&candidate))
        {
            debug!(device_id = %id, "device already registered");
            return Ok(id);
        }

        let id = candidate.open_handle()?;

        if let Err(source) = self.driver.init(&mut candidate) {
            warn!(device_id = %id, error = %source, "device init failed");
            return Err(RegistrationError::Init {
                path: path.to_path_buf(),
                source,
            });
        }

        if let Err(source) = self.driver.start(&mut candidate) {
            warn!(device_id = %id, error = %source, "capture start failed");
            self.teardown(&mut candidate);
            return Err(RegistrationError::Start {
                path: path.to_path_buf(),
                source,
            });
        }

        self.devices.insert(id, candidate);
        self.needs_frame_refresh = true;
        record_device_count(self.devices.len());
        record_registration();
        info!(device_id = %id, devices = self.devices.len(), "device registered");

        Ok(id)
    }

    /// Stop and close device `id`.
    #[instrument(
        level = "debug",
        name = "sync_engine_deregister",
        skip(self, id),
        fields(device_id = %id)
    )]
    pub fn deregister_device(&mut self, id: DeviceId) -> Result<DeviceId, RegistrationError> {
        let mut device = self
            .devices
            .remove(&id)
            .ok_or(RegistrationError::UnknownDevice(id))?;

        // the descriptor number may be reused by the next registration
        self.retired.push(id);
        self.needs_frame_refresh = true;
        self.teardown(&mut device);
        device.close();

        record_device_count(self.devices.len());
        info!(devices = self.devices.len(), "device deregistered");
        Ok(id)
    }

    /// Best-effort stop and uninit; failures are logged.
    fn teardown(&mut self, device: &mut Device) {
        if let Err(e) = self.driver.stop(device) {
            warn!(device = %device.name(), error = %e, "stop failed");
        }
        if let Err(e) = self.driver.uninit(device) {
            warn!(device = %device.name(), error = %e, "uninit failed");
        }
    }

    /// Capture up to `max_frames` synchronized frame sets, or until halted
    /// when `None`.
    ///
    /// Returns the number of sets delivered when the budget is reached.
    #[instrument(
        level = "debug",
        name = "sync_engine_capture",
        skip(self),
        fields(devices = self.devices.len())
    )]
    pub fn capture(&mut self, max_frames: Option<u32>) -> Result<u32, CaptureError> {
        if self.busy {
            debug!("capture already in progress");
            return Err(CaptureError::Busy);
        }

        self.busy = true;
        self.last_sync = self.driver.now() - self.config.start_offset();

        let result = self.capture_loop(max_frames);

        self.busy = false;
        record_capture_result(&result);
        match &result {
            Ok(count) => debug!(count, "capture complete"),
            Err(e) => debug!(error = %e, code = e.code(), "capture ended"),
        }
        result
    }

    fn capture_loop(&mut self, max_frames: Option<u32>) -> Result<u32, CaptureError> {
        let mut count = 0;
        let mut fatal: Option<SyncLoss> = None;

        loop {
            if self.callback.is_none() {
                return Err(CaptureError::NoCallback);
            }
            if self.halt.swap(false, Ordering::SeqCst) {
                return Err(CaptureError::Halted);
            }
            if self.devices.is_empty() {
                return Err(CaptureError::NoDevices);
            }
            if max_frames.is_some_and(|max| count >= max) {
                return Ok(count);
            }
            if let Some(loss) = fatal.take() {
                return Err(CaptureError::SyncLost(loss));
            }

            match self.iterate() {
                Ok(delivered) => count += delivered,
                Err(loss) => {
                    record_sync_loss(&loss);
                    fatal = Some(loss);
                }
            }
        }
    }

    /// One wait-swap-test pass. Returns the number of frame sets delivered.
    fn iterate(&mut self) -> Result<u32, SyncLoss> {
        if self.needs_frame_refresh {
            self.refresh_frames();
        }

        let ready = self.wait()?;
        let window = SyncWindow::from(&self.config);
        let mut delivered = 0;

        for id in ready {
            if !self.devices.contains_key(&id) {
                continue;
            }

            self.swap_frame(id)?;

            let now = self.driver.now();
            match sync_test(&mut self.frames, now, &mut self.last_sync, &window) {
                SyncStatus::InSync => {
                    self.deliver();
                    delivered += 1;
                }
                SyncStatus::NotYet => {}
                SyncStatus::Lost(loss) => return Err(loss),
            }

            // the callback changed the device set: rebuild frames first
            if self.needs_frame_refresh {
                break;
            }
        }

        Ok(delivered)
    }

    fn refresh_frames(&mut self) {
        let now = self.driver.now();
        for id in self.retired.drain(..) {
            self.frames.remove(id);
        }
        self.frames.refresh(&self.devices, now);
        self.needs_frame_refresh = false;
        debug!(frames = self.frames.len(), "frame set refreshed");
    }

    fn wait(&self) -> Result<Vec<DeviceId>, SyncLoss> {
        let fds: Vec<_> = self
            .devices
            .iter()
            .filter_map(|(&id, device)| device.as_fd().map(|fd| (id, fd)))
            .collect();

        match wait_readable(&fds, self.config.no_sync_window()) {
            Ok(Readiness::Ready(ids)) => Ok(ids),
            Ok(Readiness::TimedOut) => {
                warn!(timeout = ?self.config.no_sync_window(), "waited too long for a frame");
                Err(SyncLoss::WaitTimedOut)
            }
            Err(errno) => {
                warn!(error = %errno, "readiness wait failed");
                Err(SyncLoss::WaitFailed {
                    message: errno.to_string(),
                })
            }
        }
    }

    /// Exchange the device's current frame for a newly filled buffer.
    ///
    /// Nothing happens when the driver has no buffer ready.
    fn swap_frame(&mut self, id: DeviceId) -> Result<(), SyncLoss> {
        let Some(device) = self.devices.get_mut(&id) else {
            return Ok(());
        };
        let swap_failed = |e: frame_grabber::DriverError| {
            warn!(device_id = %id, error = %e, "buffer swap failed");
            SyncLoss::SwapFailed {
                device: id,
                message: e.to_string(),
            }
        };

        let Some(descriptor) = self.driver.dequeue(device).map_err(swap_failed)? else {
            return Ok(());
        };

        if let Some(slot) = self.frames.get(id).and_then(Frame::slot) {
            if let Err(e) = self.driver.enqueue(device, slot) {
                // keep the current frame and return the new buffer instead
                if let Err(requeue) = self.driver.enqueue(device, descriptor.slot) {
                    warn!(
                        device_id = %id,
                        slot = descriptor.slot,
                        error = %requeue,
                        "buffer not returned to driver"
                    );
                }
                return Err(swap_failed(e));
            }
        }

        self.frames.insert(Frame::from_descriptor(id, &descriptor));
        record_frame_swapped(id);
        Ok(())
    }

    /// Hand the current frame set to the callback.
    fn deliver(&mut self) {
        let Some(mut callback) = self.callback.take() else {
            return;
        };
        let frames = std::mem::take(&mut self.frames);
        record_sync_point(frames.len(), frames.spread());

        callback(self, &frames);

        self.frames = frames;
        if self.callback.is_none() {
            self.callback = Some(callback);
        }
    }

    /// Request the running capture to stop.
    pub fn capture_halt(&self) {
        self.halt.store(true, Ordering::SeqCst);
    }

    /// Handle for halting captures from other threads.
    pub fn halt_handle(&self) -> HaltHandle {
        HaltHandle(Arc::clone(&self.halt))
    }

    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(&id)
    }

    pub fn device_mut(&mut self, id: DeviceId) -> Option<&mut Device> {
        self.devices.get_mut(&id)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn device_ids(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.devices.keys().copied()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Frames as of the last iteration. Empty while the callback runs;
    /// use the set passed to the callback instead.
    pub fn frames(&self) -> &FrameSet {
        &self.frames
    }

    /// Image of `frame`, if its device is still registered.
    pub fn image(&self, frame: &Frame) -> Option<&[u8]> {
        frame.image(self.devices.get(&frame.device_id())?)
    }

    pub fn config(&self) -> &SyncEngineConfig {
        &self.config
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }
}

impl<D: CaptureDriver> Drop for SyncEngine<D> {
    fn drop(&mut self) {
        let ids: Vec<_> = self.devices.keys().copied().collect();
        for id in ids {
            // ids come from the map, so this cannot miss
            let _ = self.deregister_device(id);
        }
    }
}

impl<D: CaptureDriver> std::fmt::Debug for SyncEngine<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("devices", &self.devices)
            .field("frames", &self.frames)
            .field("busy", &self.busy)
            .field("needs_frame_refresh", &self.needs_frame_refresh)
            .field("retired", &self.retired)
            .field("last_sync", &self.last_sync)
            .finish_non_exhaustive()
    }
}
