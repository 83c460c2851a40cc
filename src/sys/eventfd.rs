use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};

use crate::sys::fd::FileDesc;
use crate::sys::syscall;

/// Non-blocking eventfd counter, used both as the loop's own wake-up
/// mechanism and as the backing primitive for cross-thread signals.
#[derive(Debug)]
pub struct EventFd {
    inner: FileDesc,
}

impl EventFd {
    pub fn new() -> io::Result<EventFd> {
        let flags = libc::EFD_CLOEXEC | libc::EFD_NONBLOCK;
        let fd = syscall!(eventfd(0, flags))?;
        Ok(EventFd {
            inner: unsafe { FileDesc::from_raw(fd) },
        })
    }

    /// Add `val` to the counter, waking anyone polling for readability.
    pub fn write(&self, val: u64) -> io::Result<()> {
        let buf = val.to_ne_bytes();
        (&self.inner).write_all(&buf)
    }

    /// Read and reset the counter to zero. `WouldBlock` if it was already
    /// zero (nothing pending).
    pub fn read(&self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        (&self.inner).read_exact(&mut buf)?;
        Ok(u64::from_ne_bytes(buf))
    }

    /// Drain the counter without caring about the value, ignoring
    /// `WouldBlock` (already drained by someone else).
    pub fn drain(&self) -> io::Result<()> {
        match self.read() {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl AsRawFd for EventFd {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_and_read_roundtrip() {
        let efd = EventFd::new().unwrap();
        efd.write(7).unwrap();
        assert_eq!(efd.read().unwrap(), 7);
    }

    #[test]
    fn read_without_write_would_block() {
        let efd = EventFd::new().unwrap();
        let err = efd.read().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn drain_is_idempotent() {
        let efd = EventFd::new().unwrap();
        efd.write(1).unwrap();
        efd.drain().unwrap();
        efd.drain().unwrap();
    }
}
