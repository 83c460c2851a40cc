//! Small `setsockopt`/`getsockopt` helpers that `std::net` doesn't expose
//! directly, trimmed to the handful of options the stream and datagram
//! engines actually need.

use std::io;
use std::mem;
use std::os::unix::io::RawFd;

use crate::sys::syscall;

/// Fetch and clear `SO_ERROR`: the asynchronous-connect completion status.
/// `Ok(None)` means the connect succeeded; `Ok(Some(err))` carries the
/// failure the kernel recorded.
pub fn take_socket_error(fd: RawFd) -> io::Result<Option<io::Error>> {
    let mut payload: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;

    syscall!(getsockopt(
        fd,
        libc::SOL_SOCKET,
        libc::SO_ERROR,
        &mut payload as *mut _ as *mut libc::c_void,
        &mut len,
    ))?;

    if payload == 0 {
        Ok(None)
    } else {
        Ok(Some(io::Error::from_raw_os_error(payload)))
    }
}

pub fn set_reuseaddr(fd: RawFd, on: bool) -> io::Result<()> {
    set_bool_opt(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, on)
}

fn set_bool_opt(fd: RawFd, level: libc::c_int, name: libc::c_int, on: bool) -> io::Result<()> {
    let value: libc::c_int = if on { 1 } else { 0 };
    syscall!(setsockopt(
        fd,
        level,
        name,
        &value as *const _ as *const libc::c_void,
        mem::size_of::<libc::c_int>() as libc::socklen_t,
    ))?;
    Ok(())
}
