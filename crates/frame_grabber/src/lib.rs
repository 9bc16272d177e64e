//! # Frame Grabber
//!
//! Capture device plumbing below the sync engine.
//!
//! Responsibilities:
//! - Identify and open device nodes (`Device`)
//! - Track mapped buffers and their ownership (`BufferPool`)
//! - Abstract the streaming driver (`CaptureDriver`)
//! - Provide a schedule-driven mock driver for tests
//!
//! ## Feature Flags
//!
//! - `v4l2`: Enable the V4L2 mmap streaming driver

pub mod buffer_pool;
pub mod device;
pub mod driver;
pub mod error;
pub mod mock_driver;

#[cfg(feature = "v4l2")]
pub mod v4l2_driver;

pub use buffer_pool::{BufferPool, Region, SlotOwner};
pub use device::{Device, UserData};
pub use driver::CaptureDriver;
pub use error::{DeviceError, DriverError, Result, SlotError};
pub use mock_driver::{MockCall, MockDriver, MockSchedule};

#[cfg(feature = "v4l2")]
pub use v4l2_driver::V4l2Driver;
