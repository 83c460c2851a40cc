//! Error taxonomy for the runtime.
//!
//! Mirrors `looper::error` plus the exception hierarchy in
//! `looper_except.h`: OS failures pass through with their raw code,
//! transient conditions (`again`, `in_progress`) are meant to be handled
//! internally rather than surfaced to callbacks, and contract violations
//! (`bad_handle`, `invalid_state`, ...) indicate caller error.

use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The operation would block; retry when the loop reports readiness.
    #[error("operation would block")]
    Again,

    /// A non-blocking connect has not completed yet.
    #[error("connection attempt in progress")]
    InProgress,

    /// A syscall was interrupted; the caller already retried once and
    /// this should not normally escape the I/O engine.
    #[error("operation interrupted")]
    Interrupted,

    /// The peer closed the connection (orderly EOF).
    #[error("end of file")]
    Eof,

    /// Operating-system error, carrying the raw `errno`.
    #[error("os error {0}")]
    Os(i32),

    /// A handle's (parent, kind) does not match the table it was passed to.
    #[error("handle is not valid for this operation")]
    BadHandle,

    /// A handle's slot is unoccupied (released, or never allocated).
    #[error("no such handle")]
    NoSuchHandle,

    /// A handle table has no free slots.
    #[error("no space left to allocate a new handle")]
    Allocation,

    /// A resource was asked to operate while in the wrong state machine
    /// state (e.g. `request` before `open`).
    #[error("invalid state for this operation")]
    InvalidState,

    /// A timer's requested timeout is below the minimum the loop supports.
    #[error("timeout is smaller than the minimum supported")]
    TimeoutTooSmall,

    /// `Timer::start` called while the timer is already running.
    #[error("timer is already running")]
    AlreadyRunning,

    /// `start_read` called while a read is already pending.
    #[error("already reading")]
    AlreadyReading,

    /// An operation that requires an active read was attempted without one.
    #[error("not currently reading")]
    NotReadable,

    /// The resource has entered the errored state and rejects further work.
    #[error("resource is in an errored state")]
    Errored,

    /// A SIP message could not be parsed from the bytes available so far.
    #[error("malformed sip message")]
    MalformedMessage,

    /// No header or body factory is registered under that name.
    #[error("no such header or body type registered")]
    NoSuchType,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for conditions the I/O engine retries internally and which
    /// should never reach a user callback.
    pub fn is_transient(self) -> bool {
        matches!(self, Error::Again | Error::Interrupted)
    }

    pub fn from_raw_os_error(code: i32) -> Error {
        Error::Os(code)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        match err.kind() {
            io::ErrorKind::WouldBlock => Error::Again,
            io::ErrorKind::Interrupted => Error::Interrupted,
            io::ErrorKind::UnexpectedEof => Error::Eof,
            _ => match err.raw_os_error() {
                Some(code) => Error::Os(code),
                None => Error::Os(-1),
            },
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        match err {
            Error::Again => io::Error::from(io::ErrorKind::WouldBlock),
            Error::InProgress => io::Error::from(io::ErrorKind::WouldBlock),
            Error::Interrupted => io::Error::from(io::ErrorKind::Interrupted),
            Error::Eof => io::Error::from(io::ErrorKind::UnexpectedEof),
            Error::Os(code) => io::Error::from_raw_os_error(code),
            _ => io::Error::new(io::ErrorKind::Other, err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn would_block_maps_to_again() {
        let io_err = io::Error::from(io::ErrorKind::WouldBlock);
        assert_eq!(Error::from(io_err), Error::Again);
    }

    #[test]
    fn transient_classification() {
        assert!(Error::Again.is_transient());
        assert!(Error::Interrupted.is_transient());
        assert!(!Error::Eof.is_transient());
        assert!(!Error::Os(5).is_transient());
    }
}
