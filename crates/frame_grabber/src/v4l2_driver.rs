//! V4L2 mmap streaming driver
//!
//! Talks to the kernel through the raw `VIDIOC_*` requests exposed by the
//! `v4l` crate; buffers are mapped with `memmap2`.

use std::io;
use std::mem;
use std::os::fd::AsRawFd;
use std::os::raw::{c_int, c_void};

use contracts::{BufferDescriptor, FieldOrder, Timestamp, V4l2Config, VideoStandard};
use memmap2::MmapOptions;
use tracing::{debug, info, warn};
use v4l::v4l2;
use v4l::v4l2::vidioc;
use v4l::v4l_sys::{
    v4l2_buffer, v4l2_capability, v4l2_crop, v4l2_cropcap, v4l2_format, v4l2_requestbuffers,
};

use crate::device::Device;
use crate::driver::CaptureDriver;
use crate::error::{DriverError, Result};

const BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
const MEMORY_MMAP: u32 = 1;
const CAP_VIDEO_CAPTURE: u32 = 0x0000_0001;
const CAP_STREAMING: u32 = 0x0400_0000;
const FIELD_ANY: u32 = 0;
const FIELD_NONE: u32 = 1;
const FIELD_INTERLACED: u32 = 4;
const STD_PAL: u64 = 0x0000_00ff;
const STD_NTSC: u64 = 0x0000_b000;

/// Smallest pool streaming works with.
const MIN_BUFFERS: u32 = 2;

/// Issue a request, retrying while it is interrupted.
macro_rules! xioctl {
    ($fd:expr, $request:ident, $arg:expr) => {{
        let arg = $arg as *mut _ as *mut c_void;
        loop {
            // SAFETY: `arg` points to an exclusively borrowed struct of the
            // type the request expects
            let result = unsafe { v4l2::ioctl($fd, vidioc::$request, arg) };
            match result {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(DriverError::request(stringify!($request), e)),
                Ok(()) => break Ok(()),
            }
        }
    }};
}

fn zeroed<T>() -> T {
    // SAFETY: only used for the plain-data kernel structs imported above,
    // for which all-zero is a valid bit pattern
    unsafe { mem::zeroed() }
}

fn fourcc(code: &str) -> u32 {
    let mut bytes = [b' '; 4];
    for (dst, src) in bytes.iter_mut().zip(code.bytes()) {
        *dst = src;
    }
    u32::from_le_bytes(bytes)
}

/// V4L2 driver
#[derive(Debug, Clone, Default)]
pub struct V4l2Driver {
    config: V4l2Config,
}

impl V4l2Driver {
    pub fn new(config: V4l2Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &V4l2Config {
        &self.config
    }

    fn fd(device: &Device) -> Result<c_int> {
        device
            .file()
            .map(|file| file.as_raw_fd())
            .ok_or_else(|| DriverError::not_open(device.path()))
    }

    fn check_capabilities(&self, device: &Device, fd: c_int) -> Result<()> {
        let mut caps: v4l2_capability = zeroed();
        xioctl!(fd, VIDIOC_QUERYCAP, &mut caps)?;

        if caps.capabilities & CAP_VIDEO_CAPTURE == 0 {
            return Err(DriverError::Unsupported {
                path: device.path().to_path_buf(),
                capability: "video capture",
            });
        }
        if caps.capabilities & CAP_STREAMING == 0 {
            return Err(DriverError::Unsupported {
                path: device.path().to_path_buf(),
                capability: "streaming i/o",
            });
        }
        Ok(())
    }

    fn select_input(&self, device: &Device, fd: c_int) -> Result<()> {
        let mut input = self.config.input as c_int;
        xioctl!(fd, VIDIOC_S_INPUT, &mut input)?;

        let mut standard = match self.config.standard {
            VideoStandard::Pal => STD_PAL,
            VideoStandard::Ntsc => STD_NTSC,
        };
        if let Err(e) = xioctl!(fd, VIDIOC_S_STD, &mut standard) {
            if self.config.strict_standard {
                return Err(e);
            }
            warn!(device = %device.name(), error = %e, "cannot select video standard");
        }
        Ok(())
    }

    fn reset_crop(&self, fd: c_int) {
        let mut cropcap: v4l2_cropcap = zeroed();
        cropcap.type_ = BUF_TYPE_VIDEO_CAPTURE;
        if xioctl!(fd, VIDIOC_CROPCAP, &mut cropcap).is_err() {
            return;
        }

        let mut crop: v4l2_crop = zeroed();
        crop.type_ = BUF_TYPE_VIDEO_CAPTURE;
        crop.c = cropcap.defrect;
        // cropping is optional
        let _ = xioctl!(fd, VIDIOC_S_CROP, &mut crop);
    }

    fn set_format(&self, fd: c_int) -> Result<()> {
        let mut format: v4l2_format = zeroed();
        format.type_ = BUF_TYPE_VIDEO_CAPTURE;

        // SAFETY: `pix` is the active union member for capture buffers
        unsafe {
            format.fmt.pix.width = self.config.width;
            format.fmt.pix.height = self.config.height;
            format.fmt.pix.pixelformat = fourcc(&self.config.fourcc);
            format.fmt.pix.field = match self.config.field {
                FieldOrder::Any => FIELD_ANY,
                FieldOrder::None => FIELD_NONE,
                FieldOrder::Interlaced => FIELD_INTERLACED,
            };
        }

        xioctl!(fd, VIDIOC_S_FMT, &mut format)
    }

    fn request_buffers(fd: c_int, count: u32) -> Result<u32> {
        let mut request: v4l2_requestbuffers = zeroed();
        request.count = count;
        request.type_ = BUF_TYPE_VIDEO_CAPTURE;
        request.memory = MEMORY_MMAP;
        xioctl!(fd, VIDIOC_REQBUFS, &mut request)?;
        Ok(request.count)
    }

    fn buffer(index: u32) -> v4l2_buffer {
        let mut buffer: v4l2_buffer = zeroed();
        buffer.type_ = BUF_TYPE_VIDEO_CAPTURE;
        buffer.memory = MEMORY_MMAP;
        buffer.index = index;
        buffer
    }

    fn map_buffers(device: &mut Device, fd: c_int, count: u32) -> Result<()> {
        let Some(file) = device.file() else {
            return Err(DriverError::not_open(device.path()));
        };

        let mut regions = Vec::with_capacity(count as usize);
        for index in 0..count {
            let mut buffer = Self::buffer(index);
            xioctl!(fd, VIDIOC_QUERYBUF, &mut buffer)?;

            // SAFETY: `offset` is the active member for mmap buffers
            let offset = unsafe { buffer.m.offset };
            // SAFETY: the kernel keeps the mapping valid until the buffers
            // are released with a zero-count REQBUFS in `uninit`
            let map = unsafe {
                MmapOptions::new()
                    .offset(u64::from(offset))
                    .len(buffer.length as usize)
                    .map(file)
            }
            .map_err(|e| DriverError::request("mmap", e))?;
            regions.push(map);
        }

        let pool = device.buffers_mut();
        pool.allocate(count as usize);
        for (index, map) in regions.into_iter().enumerate() {
            pool.set(index as u32, Box::new(map));
        }
        Ok(())
    }
}

impl CaptureDriver for V4l2Driver {
    fn init(&mut self, device: &mut Device) -> Result<()> {
        let fd = Self::fd(device)?;

        self.check_capabilities(device, fd)?;
        self.select_input(device, fd)?;
        self.reset_crop(fd);
        self.set_format(fd)?;

        let requested = device.buffer_count();
        let granted = Self::request_buffers(fd, requested)?;
        if granted < MIN_BUFFERS {
            return Err(DriverError::InsufficientBuffers { requested, granted });
        }
        if granted != requested {
            debug!(device = %device.name(), requested, granted, "driver adjusted buffer count");
        }

        Self::map_buffers(device, fd, granted)?;
        info!(
            device = %device.name(),
            buffers = granted,
            width = self.config.width,
            height = self.config.height,
            "v4l2 device initialised"
        );
        Ok(())
    }

    fn uninit(&mut self, device: &mut Device) -> Result<()> {
        device.buffers_mut().release();
        let fd = Self::fd(device)?;
        Self::request_buffers(fd, 0).map(|_| ())
    }

    fn stream_on(&mut self, device: &Device) -> Result<()> {
        let fd = Self::fd(device)?;
        let mut kind = BUF_TYPE_VIDEO_CAPTURE as c_int;
        xioctl!(fd, VIDIOC_STREAMON, &mut kind)
    }

    fn stream_off(&mut self, device: &Device) -> Result<()> {
        let fd = Self::fd(device)?;
        let mut kind = BUF_TYPE_VIDEO_CAPTURE as c_int;
        xioctl!(fd, VIDIOC_STREAMOFF, &mut kind)
    }

    fn queue_buffer(&mut self, device: &Device, slot: u32) -> Result<()> {
        let fd = Self::fd(device)?;
        let mut buffer = Self::buffer(slot);
        xioctl!(fd, VIDIOC_QBUF, &mut buffer)
    }

    fn dequeue_buffer(&mut self, device: &Device) -> Result<Option<BufferDescriptor>> {
        let fd = Self::fd(device)?;
        let mut buffer = Self::buffer(0);

        match xioctl!(fd, VIDIOC_DQBUF, &mut buffer) {
            Ok(()) => {}
            Err(DriverError::Request { source, .. })
                if source.kind() == io::ErrorKind::WouldBlock =>
            {
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        let timestamp = Timestamp::from_timeval(
            buffer.timestamp.tv_sec as i64,
            buffer.timestamp.tv_usec as i64,
        );
        Ok(Some(BufferDescriptor::new(
            buffer.index,
            timestamp,
            buffer.sequence,
        )))
    }
}
