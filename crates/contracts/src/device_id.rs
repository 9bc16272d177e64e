//! Device identifiers
//!
//! `DeviceId` names a registered device for the lifetime of its
//! registration; `DeviceNumber` names the underlying hardware node and is
//! the de-duplication key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::os::fd::RawFd;

/// Identifier of a registered capture device.
///
/// The value is the descriptor number of the device's open handle, so it is
/// unique among live registrations and cheap to copy.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(RawFd);

impl DeviceId {
    /// Wrap a raw descriptor number.
    #[inline]
    pub const fn new(fd: RawFd) -> Self {
        Self(fd)
    }

    /// Raw descriptor number.
    #[inline]
    pub const fn as_raw(&self) -> RawFd {
        self.0
    }
}

impl From<RawFd> for DeviceId {
    #[inline]
    fn from(fd: RawFd) -> Self {
        Self(fd)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self.0)
    }
}

/// Platform device number (`st_rdev`) of a character device node.
///
/// Two paths that resolve to the same node (hard links, symlinks, udev
/// aliases) share a device number.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceNumber(u64);

impl DeviceNumber {
    /// Wrap a raw `dev_t`.
    #[inline]
    pub const fn from_raw(rdev: u64) -> Self {
        Self(rdev)
    }

    /// Raw `dev_t`.
    #[inline]
    pub const fn as_raw(&self) -> u64 {
        self.0
    }

    /// Major number (driver class).
    pub fn major(&self) -> u32 {
        libc::major(self.0 as libc::dev_t) as u32
    }

    /// Minor number (instance within the driver).
    pub fn minor(&self) -> u32 {
        libc::minor(self.0 as libc::dev_t) as u32
    }
}

impl fmt::Display for DeviceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major(), self.minor())
    }
}

impl fmt::Debug for DeviceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceNumber({}:{})", self.major(), self.minor())
    }
}
