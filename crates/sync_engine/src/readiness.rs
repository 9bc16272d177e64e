//! Readiness wait over all device descriptors.

use std::os::fd::BorrowedFd;
use std::time::Duration;

use contracts::DeviceId;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

/// Outcome of one wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Devices with data (or an error) pending, in the order given
    Ready(Vec<DeviceId>),
    /// Nothing became readable before the timeout
    TimedOut,
}

/// Block until at least one descriptor is readable or `timeout` passes.
///
/// Interrupted waits are restarted with the full timeout. A descriptor in
/// an error or hang-up state counts as ready so the following dequeue
/// reports the failure.
pub fn wait_readable(
    devices: &[(DeviceId, BorrowedFd<'_>)],
    timeout: Duration,
) -> Result<Readiness, Errno> {
    let mut fds: Vec<PollFd<'_>> = devices
        .iter()
        .map(|(_, fd)| PollFd::new(*fd, PollFlags::POLLIN))
        .collect();
    let timeout = poll_timeout(timeout);

    let ready = loop {
        match poll(&mut fds, timeout) {
            Ok(n) => break n,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e),
        }
    };

    if ready == 0 {
        return Ok(Readiness::TimedOut);
    }

    let wake = PollFlags::POLLIN | PollFlags::POLLERR | PollFlags::POLLHUP;
    let ids = devices
        .iter()
        .zip(&fds)
        .filter(|(_, fd)| fd.revents().is_some_and(|revents| revents.intersects(wake)))
        .map(|((id, _), _)| *id)
        .collect();
    Ok(Readiness::Ready(ids))
}

/// Millisecond poll timeout, rounded up so short waits never become 0.
fn poll_timeout(timeout: Duration) -> PollTimeout {
    let ms = timeout.as_micros().div_ceil(1000);
    i32::try_from(ms)
        .ok()
        .and_then(|ms| PollTimeout::try_from(ms).ok())
        .unwrap_or(PollTimeout::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::os::fd::AsFd;

    #[test]
    fn test_char_device_is_ready() {
        let null = File::open("/dev/null").unwrap();
        let id = DeviceId::new(7);

        let readiness = wait_readable(&[(id, null.as_fd())], Duration::from_millis(50)).unwrap();
        assert_eq!(readiness, Readiness::Ready(vec![id]));
    }

    #[test]
    fn test_timeout_without_data() {
        let (reader, _writer) = std::io::pipe().unwrap();

        let readiness =
            wait_readable(&[(DeviceId::new(1), reader.as_fd())], Duration::from_millis(10)).unwrap();
        assert_eq!(readiness, Readiness::TimedOut);
    }

    #[test]
    fn test_only_readable_devices_reported() {
        let (idle, _idle_writer) = std::io::pipe().unwrap();
        let (busy, mut busy_writer) = std::io::pipe().unwrap();
        busy_writer.write_all(b"x").unwrap();

        let readiness = wait_readable(
            &[(DeviceId::new(1), idle.as_fd()), (DeviceId::new(2), busy.as_fd())],
            Duration::from_millis(50),
        )
        .unwrap();
        assert_eq!(readiness, Readiness::Ready(vec![DeviceId::new(2)]));
    }

    #[test]
    fn test_timeout_rounds_up() {
        assert_eq!(poll_timeout(Duration::from_micros(1)), PollTimeout::try_from(1).unwrap());
        assert_eq!(poll_timeout(Duration::from_millis(168)), PollTimeout::try_from(168).unwrap());
        assert_eq!(poll_timeout(Duration::from_secs(u64::MAX)), PollTimeout::MAX);
    }
}
