//! # Sync Engine
//!
//! 多设备帧同步引擎。
//!
//! 负责：
//! - 设备注册与去重
//! - 等待所有设备就绪并交换缓冲区
//! - 同步窗口判定
//! - 向回调交付同步帧集
//!
//! ## 使用示例
//!
//! ```ignore
//! use sync_engine::{MockDriver, SyncEngine};
//!
//! let mut engine = SyncEngine::new(MockDriver::new());
//! engine.register_device("/dev/video0", None)?;
//! engine.register_device("/dev/video1", None)?;
//!
//! engine.register_callback(|engine, frames| {
//!     for frame in frames {
//!         let image = engine.image(frame);
//!         // ...
//!     }
//! });
//!
//! let captured = engine.capture(Some(10))?;
//! ```

mod engine;
mod error;
mod frame;
mod readiness;
mod window;

pub use engine::{FrameCallback, HaltHandle, SyncEngine};
pub use error::RegistrationError;
pub use frame::{Frame, FrameSet};
pub use readiness::{wait_readable, Readiness};
pub use window::{sync_test, SyncWindow};

// Re-export contracts types
pub use contracts::{CaptureError, DeviceId, SyncEngineConfig, SyncLoss, SyncStatus, Timestamp};

// Re-export driver types
pub use frame_grabber::{CaptureDriver, Device, MockDriver, MockSchedule, UserData};

#[cfg(feature = "v4l2")]
pub use frame_grabber::V4l2Driver;
