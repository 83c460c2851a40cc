//! Generic stream I/O engine shared by TCP and UNIX-domain stream sockets.
//!
//! Grounded in `loop_io.h`'s `base_io`/`io` template: a write queue drained
//! up to [`MAX_WRITES_PER_CYCLE`] requests per wake-up so one chatty peer
//! can't starve the loop, idempotent `start_read`/`stop_read`, and a
//! non-blocking connect whose completion is reported by finalizing via
//! `SO_ERROR` once the socket reports writable.
//!
//! Per-connection state (the write queue, the read callback, the state
//! machine) lives behind its own `Mutex` rather than folding into the
//! loop's single mutex the way the original's handle tables do -- Rust's
//! handle table is not type-erased, so a generic per-kind record would
//! need one more layer of dynamic dispatch for no real benefit. Lock
//! ordering stays simple because the loop always drops its own mutex
//! before invoking a resource callback, so a callback is free to take this
//! mutex without risking a cycle back into the loop's lock.
//!
//! [`do_read`] and [`do_write`] take this same mutex themselves, and use
//! the same take/drop-lock/invoke discipline as the reactor: a completion
//! callback never runs while this mutex is held, so a handler that calls
//! back into the same stream (an echo handler writing the bytes it just
//! read) doesn't self-deadlock on it.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use log::warn;

use crate::error::{Error, Result};
use crate::future::Future;
use crate::handle::Handle;
use crate::reactor::{EventsUpdate, Loop, MAX_WRITES_PER_CYCLE};
use crate::ready::Ready;

/// Fallback used only if the owning loop has already been dropped out
/// from under a still-dispatching callback; [`Loop::read_buffer_size`]
/// governs normal operation.
const READ_SCRATCH_SIZE: usize = 1024;

/// A connection-oriented socket type the stream engine can drive: TCP and
/// UNIX-domain streams both satisfy this via `std`'s own implementations.
pub trait StreamBackend: Read + Write + AsRawFd + Send + 'static {
    fn take_error(&self) -> io::Result<Option<io::Error>>;
}

impl StreamBackend for std::net::TcpStream {
    fn take_error(&self) -> io::Result<Option<io::Error>> {
        std::net::TcpStream::take_error(self)
    }
}

impl StreamBackend for std::os::unix::net::UnixStream {
    fn take_error(&self) -> io::Result<Option<io::Error>> {
        std::os::unix::net::UnixStream::take_error(self)
    }
}

pub struct WriteRequest {
    buffer: Vec<u8>,
    pos: usize,
    callback: Box<dyn FnOnce(Result<()>) + Send>,
}

impl WriteRequest {
    pub fn new(buffer: Vec<u8>, callback: impl FnOnce(Result<()>) + Send + 'static) -> WriteRequest {
        WriteRequest {
            buffer,
            pos: 0,
            callback: Box::new(callback),
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum ConnState {
    Connecting,
    Connected,
    Errored,
}

struct Inner<B: StreamBackend> {
    socket: B,
    resource: Handle,
    state: ConnState,
    reading: bool,
    write_pending: bool,
    write_queue: VecDeque<WriteRequest>,
    read_callback: Option<Box<dyn FnMut(Result<&[u8]>) + Send>>,
    connect_callback: Option<Box<dyn FnOnce(Result<()>) + Send>>,
}

/// A handle-like wrapper driving one stream socket's read/write state
/// machine on the loop it was registered with.
pub struct StreamIo<B: StreamBackend> {
    loop_: Weak<Loop>,
    inner: Arc<Mutex<Inner<B>>>,
}

impl<B: StreamBackend> Clone for StreamIo<B> {
    fn clone(&self) -> Self {
        StreamIo {
            loop_: self.loop_.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<B: StreamBackend> StreamIo<B> {
    /// Register an already-connected socket.
    pub fn connected(loop_: &Arc<Loop>, socket: B) -> Result<StreamIo<B>> {
        Self::register(loop_, socket, ConnState::Connected, None)
    }

    /// Register a socket whose `connect()` returned `EINPROGRESS`; the
    /// engine waits for writability, finalizes via `SO_ERROR`, and always
    /// reports completion from a scheduled [`Future`] rather than inline.
    pub fn connecting(
        loop_: &Arc<Loop>,
        socket: B,
        connect_callback: impl FnOnce(Result<()>) + Send + 'static,
    ) -> Result<StreamIo<B>> {
        Self::register(loop_, socket, ConnState::Connecting, Some(Box::new(connect_callback)))
    }

    fn register(
        loop_: &Arc<Loop>,
        socket: B,
        state: ConnState,
        connect_callback: Option<Box<dyn FnOnce(Result<()>) + Send>>,
    ) -> Result<StreamIo<B>> {
        let fd = socket.as_raw_fd();
        let interest = if state == ConnState::Connecting {
            Ready::WRITABLE
        } else {
            Ready::EMPTY
        };

        let inner = Arc::new(Mutex::new(Inner {
            socket,
            resource: Handle::default(),
            state,
            reading: false,
            write_pending: state == ConnState::Connecting,
            write_queue: VecDeque::new(),
            read_callback: None,
            connect_callback,
        }));

        let weak_loop = Arc::downgrade(loop_);
        let cb_inner = inner.clone();
        let cb_loop = weak_loop.clone();
        let resource = loop_.add_resource(
            fd,
            interest,
            Box::new(move |_h, readiness| {
                handle_events(&cb_loop, &cb_inner, readiness);
            }),
        )?;
        inner.lock().unwrap().resource = resource;

        Ok(StreamIo { loop_: weak_loop, inner })
    }

    pub fn start_read(&self, callback: impl FnMut(Result<&[u8]>) + Send + 'static) -> Result<()> {
        let loop_ = self.upgrade()?;
        let mut inner = self.inner.lock().unwrap();
        if inner.state == ConnState::Errored {
            return Err(Error::Errored);
        }
        if inner.reading {
            return Err(Error::AlreadyReading);
        }
        inner.reading = true;
        inner.read_callback = Some(Box::new(callback));
        let resource = inner.resource;
        drop(inner);
        loop_.request_events(resource, EventsUpdate::Append(Ready::READABLE))
    }

    pub fn stop_read(&self) -> Result<()> {
        let loop_ = self.upgrade()?;
        let mut inner = self.inner.lock().unwrap();
        inner.reading = false;
        inner.read_callback = None;
        let resource = inner.resource;
        drop(inner);
        loop_.request_events(resource, EventsUpdate::Remove(Ready::READABLE))
    }

    pub fn write(&self, data: Vec<u8>, callback: impl FnOnce(Result<()>) + Send + 'static) -> Result<()> {
        let loop_ = self.upgrade()?;
        let mut inner = self.inner.lock().unwrap();
        if inner.state == ConnState::Errored {
            return Err(Error::Errored);
        }
        inner.write_queue.push_back(WriteRequest::new(data, callback));
        let needs_subscribe = !inner.write_pending;
        inner.write_pending = true;
        let resource = inner.resource;
        drop(inner);
        if needs_subscribe {
            loop_.request_events(resource, EventsUpdate::Append(Ready::WRITABLE))?;
        }
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        let loop_ = self.upgrade()?;
        let resource = self.inner.lock().unwrap().resource;
        loop_.remove_resource(resource)
    }

    pub fn local_fd(&self) -> RawFd {
        self.inner.lock().unwrap().socket.as_raw_fd()
    }

    fn upgrade(&self) -> Result<Arc<Loop>> {
        self.loop_.upgrade().ok_or(Error::NoSuchHandle)
    }
}

fn handle_events<B: StreamBackend>(loop_: &Weak<Loop>, inner: &Arc<Mutex<Inner<B>>>, readiness: Ready) {
    {
        let mut guard = inner.lock().unwrap();

        if guard.state == ConnState::Connecting {
            finalize_connect(loop_, &mut guard, readiness);
            return;
        }

        if readiness.is_error() || readiness.is_hup() {
            guard.state = ConnState::Errored;
            guard.reading = false;
            let callback = guard.read_callback.take();
            drop(guard);
            if let Some(mut cb) = callback {
                cb(Err(Error::Errored));
            }
            return;
        }
    }

    if readiness.is_readable() {
        do_read(loop_, inner);
    }
    if readiness.is_writable() {
        do_write(loop_, inner);
    }
}

fn finalize_connect<B: StreamBackend>(loop_: &Weak<Loop>, guard: &mut Inner<B>, readiness: Ready) {
    if !readiness.is_writable() && !readiness.is_error() {
        return;
    }

    let outcome = match guard.socket.take_error() {
        Ok(None) => Ok(()),
        Ok(Some(e)) => Err(Error::from(e)),
        Err(e) => Err(Error::from(e)),
    };

    guard.write_pending = false;
    if outcome.is_err() {
        guard.state = ConnState::Errored;
    } else {
        guard.state = ConnState::Connected;
    }

    let callback = guard.connect_callback.take();
    let Some(loop_arc) = loop_.upgrade() else { return };

    // Never invoke the connect callback inline from this dispatch: always
    // schedule it through a zero-delay future so it runs on a later loop
    // iteration, matching every other user callback's delivery path.
    if let Some(cb) = callback {
        let _ = Future::execute(&loop_arc, Duration::from_millis(0), move || cb(outcome));
    }
}

/// One read, delivered with `inner`'s lock released before the callback
/// runs -- a callback that calls `write`/`start_read`/`stop_read` on this
/// same stream from inside itself must not re-enter a held lock.
fn do_read<B: StreamBackend>(loop_: &Weak<Loop>, inner: &Arc<Mutex<Inner<B>>>) {
    let mut guard = inner.lock().unwrap();
    if !guard.reading {
        return;
    }
    let size = loop_.upgrade().map(|l| l.read_buffer_size()).unwrap_or(READ_SCRATCH_SIZE);
    let mut buf = vec![0u8; size];
    let outcome = guard.socket.read(&mut buf);

    match outcome {
        Ok(0) => {
            guard.reading = false;
            let callback = guard.read_callback.take();
            drop(guard);
            if let Some(mut cb) = callback {
                cb(Err(Error::Eof));
            }
        }
        Ok(n) => {
            let mut callback = guard.read_callback.take();
            drop(guard);
            if let Some(cb) = callback.as_mut() {
                cb(Ok(&buf[..n]));
            }
            if let Some(cb) = callback {
                let mut guard = inner.lock().unwrap();
                if guard.read_callback.is_none() && guard.reading {
                    guard.read_callback = Some(cb);
                }
            }
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
        Err(e) => {
            guard.state = ConnState::Errored;
            guard.reading = false;
            let callback = guard.read_callback.take();
            drop(guard);
            if let Some(mut cb) = callback {
                cb(Err(Error::from(e)));
            }
        }
    }
}

/// Drains up to the configured number of queued writes, delivering each
/// completed request's callback in FIFO order only after `inner`'s lock
/// is released -- see [`do_read`].
fn do_write<B: StreamBackend>(loop_: &Weak<Loop>, inner: &Arc<Mutex<Inner<B>>>) {
    let mut guard = inner.lock().unwrap();
    let max_writes = loop_.upgrade().map(|l| l.max_writes_per_cycle()).unwrap_or(MAX_WRITES_PER_CYCLE);
    let mut completed: Vec<(Box<dyn FnOnce(Result<()>) + Send>, Result<()>)> = Vec::new();
    let mut writes_done = 0;
    while writes_done < max_writes {
        let Some(req) = guard.write_queue.front_mut() else {
            break;
        };
        match guard.socket.write(&req.buffer[req.pos..]) {
            Ok(n) => {
                req.pos += n;
                if req.pos >= req.buffer.len() {
                    let req = guard.write_queue.pop_front().unwrap();
                    completed.push((req.callback, Ok(())));
                    writes_done += 1;
                } else {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => {
                let error = Error::from(e);
                guard.state = ConnState::Errored;
                while let Some(req) = guard.write_queue.pop_front() {
                    completed.push((req.callback, Err(error)));
                }
                break;
            }
        }
    }

    let drained = guard.write_queue.is_empty();
    if drained {
        guard.write_pending = false;
    }
    let resource = guard.resource;
    drop(guard);

    for (callback, result) in completed {
        callback(result);
    }

    if drained {
        if let Some(loop_arc) = loop_.upgrade() {
            if let Err(e) = loop_arc.request_events(resource, EventsUpdate::Remove(Ready::WRITABLE)) {
                warn!("failed to drop writable subscription after drain: {e}");
            }
        }
    }
}
