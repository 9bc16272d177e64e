//! # Contracts
//!
//! Interface contracts shared by every crate in the workspace: identifiers,
//! the capture clock, driver buffer descriptors, configuration and the
//! capture/registration result taxonomy.
//!
//! ## Time Model
//! - Frame timestamps and the engine's notion of "now" live on the same
//!   clock, chosen by the capture driver (CLOCK_MONOTONIC by default)
//! - `sequence` is the driver's frame counter, used for diagnostics only

mod blueprint;
mod buffer;
mod capture;
mod device_id;
mod error;
mod sync_engine_config;
mod timestamp;

pub use blueprint::*;
pub use buffer::BufferDescriptor;
pub use capture::*;
pub use device_id::{DeviceId, DeviceNumber};
pub use error::*;
pub use sync_engine_config::*;
pub use timestamp::Timestamp;
