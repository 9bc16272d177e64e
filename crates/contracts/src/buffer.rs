//! Driver buffer descriptors

use serde::{Deserialize, Serialize};

use crate::Timestamp;

/// A filled buffer handed back by the capture driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferDescriptor {
    /// Index of the buffer slot in the device's pool
    pub slot: u32,
    /// Capture time reported by the driver
    pub timestamp: Timestamp,
    /// Driver frame counter
    pub sequence: u32,
}

impl BufferDescriptor {
    pub fn new(slot: u32, timestamp: Timestamp, sequence: u32) -> Self {
        Self {
            slot,
            timestamp,
            sequence,
        }
    }
}
