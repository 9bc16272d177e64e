//! Capture device handle
//!
//! A `Device` pairs an opened device node with its buffer pool and the
//! caller's opaque data. The node is identified by its device number, so
//! two paths naming the same hardware compare equal.

use std::any::Any;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::os::unix::fs::{FileTypeExt, MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use contracts::{DeviceId, DeviceNumber};
use tracing::{debug, warn};

use crate::buffer_pool::BufferPool;
use crate::error::DeviceError;

/// Opaque caller data attached to a device.
pub type UserData = Box<dyn Any + Send>;

/// A capture device node.
pub struct Device {
    handle: Option<File>,
    path: PathBuf,
    device_number: Option<DeviceNumber>,
    buffers: BufferPool,
    buffer_count: u32,
    user_data: Option<UserData>,
}

impl Device {
    /// Describe the device at `path` without opening it.
    ///
    /// A missing path or one that is not a character device still yields a
    /// `Device`, but without a device number; such a device is never valid.
    pub fn open(path: impl AsRef<Path>, buffer_count: u32, user_data: Option<UserData>) -> Self {
        let path = path.as_ref().to_path_buf();

        let device_number = match std::fs::metadata(&path) {
            Ok(meta) if meta.file_type().is_char_device() => {
                Some(DeviceNumber::from_raw(meta.rdev()))
            }
            Ok(_) => {
                warn!(path = %path.display(), "not a character device");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot identify device");
                None
            }
        };

        Self {
            handle: None,
            path,
            device_number,
            buffers: BufferPool::new(),
            buffer_count,
            user_data,
        }
    }

    /// Open the device node read-write, non-blocking and synchronous.
    ///
    /// Returns the id of the already open handle when called again.
    pub fn open_handle(&mut self) -> Result<DeviceId, DeviceError> {
        if let Some(file) = &self.handle {
            return Ok(DeviceId::new(file.as_raw_fd()));
        }

        if self.device_number.is_none() {
            return Err(DeviceError::NotADevice {
                path: self.path.clone(),
            });
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_SYNC)
            .open(&self.path)
            .map_err(|source| {
                warn!(path = %self.path.display(), error = %source, "cannot open device");
                DeviceError::Open {
                    path: self.path.clone(),
                    source,
                }
            })?;

        let id = DeviceId::new(file.as_raw_fd());
        debug!(path = %self.path.display(), device_id = %id, "device opened");
        self.handle = Some(file);
        Ok(id)
    }

    /// Close the handle and release the buffer pool.
    pub fn close(&mut self) {
        self.buffers.release();
        if let Some(file) = self.handle.take() {
            debug!(path = %self.path.display(), fd = file.as_raw_fd(), "device closed");
        }
    }

    /// Id of the open handle.
    pub fn id(&self) -> Option<DeviceId> {
        self.handle
            .as_ref()
            .map(|file| DeviceId::new(file.as_raw_fd()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path as display text, used in logs and reports.
    pub fn name(&self) -> String {
        self.path.display().to_string()
    }

    pub fn device_number(&self) -> Option<DeviceNumber> {
        self.device_number
    }

    /// Whether the path names a character device.
    pub fn is_valid(&self) -> bool {
        self.device_number.is_some()
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn buffer_count(&self) -> u32 {
        self.buffer_count
    }

    pub fn buffers(&self) -> &BufferPool {
        &self.buffers
    }

    pub fn buffers_mut(&mut self) -> &mut BufferPool {
        &mut self.buffers
    }

    /// Open handle, for drivers that issue requests on it.
    pub fn file(&self) -> Option<&File> {
        self.handle.as_ref()
    }

    pub fn as_fd(&self) -> Option<BorrowedFd<'_>> {
        self.handle.as_ref().map(|file| file.as_fd())
    }

    /// Caller data, if present and of type `T`.
    pub fn user_data<T: Any>(&self) -> Option<&T> {
        self.user_data.as_ref()?.downcast_ref::<T>()
    }

    pub fn user_data_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.user_data.as_mut()?.downcast_mut::<T>()
    }

    /// Whether both devices name the same hardware node.
    pub fn same_hardware(&self, other: &Device) -> bool {
        self == other
    }
}

/// Devices are equal when they share a device number. Invalid devices are
/// never equal to anything.
impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        match (self.device_number, other.device_number) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("path", &self.path)
            .field("id", &self.id())
            .field("device_number", &self.device_number)
            .field("buffers", &self.buffers)
            .finish()
    }
}
