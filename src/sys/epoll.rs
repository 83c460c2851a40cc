use std::cmp;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use crate::ready::Ready;
use crate::sys::syscall;

/// Thin wrapper around one `epoll` instance. A loop owns exactly one of
/// these; every resource it polls is registered or removed through it.
pub struct Poller {
    epfd: RawFd,
}

impl Poller {
    pub fn new() -> io::Result<Poller> {
        let epfd = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;
        Ok(Poller { epfd })
    }

    pub fn add(&self, fd: RawFd, token: u64, interest: Ready) -> io::Result<()> {
        let mut event = to_epoll_event(interest, token);
        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, fd, &mut event))?;
        Ok(())
    }

    pub fn modify(&self, fd: RawFd, token: u64, interest: Ready) -> io::Result<()> {
        let mut event = to_epoll_event(interest, token);
        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_MOD, fd, &mut event))?;
        Ok(())
    }

    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        let mut event = libc::epoll_event { events: 0, u64: 0 };
        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, &mut event))?;
        Ok(())
    }

    pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout_ms = timeout
            .map(|d| cmp::min(d.as_millis(), libc::c_int::MAX as u128) as libc::c_int)
            .unwrap_or(-1);

        let n = syscall!(epoll_wait(
            self.epfd,
            events.raw.as_mut_ptr(),
            events.raw.capacity() as i32,
            timeout_ms,
        ))?;

        unsafe { events.raw.set_len(n as usize) };
        Ok(n as usize)
    }
}

impl AsRawFd for Poller {
    fn as_raw_fd(&self) -> RawFd {
        self.epfd
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::close(self.epfd);
        }
    }
}

fn to_epoll_event(interest: Ready, token: u64) -> libc::epoll_event {
    let mut bits = 0u32;
    if interest.is_readable() {
        bits |= libc::EPOLLIN as u32;
    }
    if interest.is_writable() {
        bits |= libc::EPOLLOUT as u32;
    }
    // Error and hangup are reported by the kernel unconditionally, but we
    // list them anyway for clarity; omitting them changes nothing.
    bits |= (libc::EPOLLERR | libc::EPOLLHUP | libc::EPOLLRDHUP) as u32;

    libc::epoll_event {
        events: bits,
        u64: token,
    }
}

pub struct Events {
    raw: Vec<libc::epoll_event>,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Events {
        Events {
            raw: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, Ready)> + '_ {
        self.raw.iter().map(|e| (e.u64, decode_readiness(e.events)))
    }
}

fn decode_readiness(bits: u32) -> Ready {
    let bits = bits as i32;
    let mut ready = Ready::EMPTY;
    if bits & (libc::EPOLLIN | libc::EPOLLPRI) != 0 {
        ready |= Ready::READABLE;
    }
    if bits & libc::EPOLLOUT != 0 {
        ready |= Ready::WRITABLE;
    }
    if bits & libc::EPOLLERR != 0 {
        ready |= Ready::ERROR;
    }
    if bits & (libc::EPOLLHUP | libc::EPOLLRDHUP) != 0 {
        ready |= Ready::HUP;
    }
    ready
}
