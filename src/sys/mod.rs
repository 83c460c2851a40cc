//! Thin wrappers around the Linux syscalls the reactor rides on: epoll,
//! eventfd, and plain file descriptors. Everything above this module talks
//! to these types and never calls `libc` directly.

/// Run a libc call that returns `-1` on error (with `errno` set), turning
/// the failure into an `io::Error`. Retries once on `EINTR`.
macro_rules! syscall {
    ($fn:ident ( $($arg:expr),* $(,)* ) ) => {{
        loop {
            let res = unsafe { libc::$fn($($arg, )*) };
            if res == -1 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                break Err(err);
            }
            break Ok(res);
        }
    }};
}

pub(crate) use syscall;

pub mod epoll;
pub mod eventfd;
pub mod fd;
pub mod sockopt;
