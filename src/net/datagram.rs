//! UDP datagram sockets. Distinct from the stream engine: no connection
//! state machine, and every write carries its own destination address.
//! Reliability, ordering and retransmission are an explicit non-goal --
//! this is a thin non-blocking wrapper, nothing more.
//!
//! `do_read`/`do_write` release this socket's `Inner` mutex before
//! invoking any read/write-completion callback, the same take/drop-lock/
//! invoke discipline `io::do_read`/`do_write` use, so a callback that
//! calls `send_to` on the same socket it was invoked from doesn't
//! self-deadlock.

use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, UdpSocket as StdUdpSocket};
use std::os::unix::io::AsRawFd;
use std::sync::{Arc, Mutex, Weak};

use log::warn;

use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::reactor::{EventsUpdate, Loop, MAX_WRITES_PER_CYCLE};
use crate::ready::Ready;

struct DatagramWriteRequest {
    buffer: Vec<u8>,
    destination: SocketAddr,
    callback: Box<dyn FnOnce(Result<()>) + Send>,
}

struct Inner {
    socket: StdUdpSocket,
    resource: Handle,
    errored: bool,
    write_pending: bool,
    reading: bool,
    write_queue: VecDeque<DatagramWriteRequest>,
    read_callback: Option<Box<dyn FnMut(Result<(&[u8], SocketAddr)>) + Send>>,
}

pub struct UdpSocket {
    loop_: Weak<Loop>,
    inner: Arc<Mutex<Inner>>,
}

impl UdpSocket {
    pub fn bind(loop_: &Arc<Loop>, addr: SocketAddr) -> Result<UdpSocket> {
        let socket = StdUdpSocket::bind(addr).map_err(Error::from)?;
        socket.set_nonblocking(true).map_err(Error::from)?;

        let inner = Arc::new(Mutex::new(Inner {
            socket,
            resource: Handle::default(),
            errored: false,
            write_pending: false,
            reading: false,
            write_queue: VecDeque::new(),
            read_callback: None,
        }));

        let fd = inner.lock().unwrap().socket.as_raw_fd();
        let weak_loop = Arc::downgrade(loop_);
        let cb_inner = inner.clone();
        let resource = loop_.add_resource(
            fd,
            Ready::EMPTY,
            Box::new(move |_h, readiness| handle_events(&weak_loop, &cb_inner, readiness)),
        )?;
        inner.lock().unwrap().resource = resource;

        Ok(UdpSocket {
            loop_: Arc::downgrade(loop_),
            inner,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.lock().unwrap().socket.local_addr()
    }

    pub fn start_read(&self, callback: impl FnMut(Result<(&[u8], SocketAddr)>) + Send + 'static) -> Result<()> {
        let loop_ = self.upgrade()?;
        let mut inner = self.inner.lock().unwrap();
        if inner.errored {
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

    pub fn send_to(
        &self,
        data: Vec<u8>,
        destination: SocketAddr,
        callback: impl FnOnce(Result<()>) + Send + 'static,
    ) -> Result<()> {
        let loop_ = self.upgrade()?;
        let mut inner = self.inner.lock().unwrap();
        if inner.errored {
            return Err(Error::Errored);
        }
        inner.write_queue.push_back(DatagramWriteRequest {
            buffer: data,
            destination,
            callback: Box::new(callback),
        });
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

    fn upgrade(&self) -> Result<Arc<Loop>> {
        self.loop_.upgrade().ok_or(Error::NoSuchHandle)
    }
}

fn handle_events(loop_: &Weak<Loop>, inner: &Arc<Mutex<Inner>>, readiness: Ready) {
    {
        let mut guard = inner.lock().unwrap();

        if readiness.is_error() || readiness.is_hup() {
            guard.errored = true;
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

/// One `recv_from`, delivered with `inner`'s lock released -- see
/// `io::do_read`: a read callback that turns around and calls `send_to`
/// on this same socket must not re-enter a held lock.
fn do_read(loop_: &Weak<Loop>, inner: &Arc<Mutex<Inner>>) {
    let mut guard = inner.lock().unwrap();
    if !guard.reading {
        return;
    }
    let size = loop_.upgrade().map(|l| l.read_buffer_size()).unwrap_or(1024);
    let mut buf = vec![0u8; size];
    let outcome = guard.socket.recv_from(&mut buf);

    match outcome {
        Ok((n, from)) => {
            let mut callback = guard.read_callback.take();
            drop(guard);
            if let Some(cb) = callback.as_mut() {
                cb(Ok((&buf[..n], from)));
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
            guard.errored = true;
            guard.reading = false;
            let callback = guard.read_callback.take();
            drop(guard);
            if let Some(mut cb) = callback {
                cb(Err(Error::from(e)));
            }
        }
    }
}

/// Drains queued datagrams, delivering each completed request's callback
/// in FIFO order only after `inner`'s lock is released -- see
/// `io::do_write`.
fn do_write(loop_: &Weak<Loop>, inner: &Arc<Mutex<Inner>>) {
    let mut guard = inner.lock().unwrap();
    let mut completed: Vec<(Box<dyn FnOnce(Result<()>) + Send>, Result<()>)> = Vec::new();
    let mut writes_done = 0;
    while writes_done < MAX_WRITES_PER_CYCLE {
        let Some(req) = guard.write_queue.front() else {
            break;
        };
        match guard.socket.send_to(&req.buffer, req.destination) {
            Ok(_) => {
                let req = guard.write_queue.pop_front().unwrap();
                completed.push((req.callback, Ok(())));
                writes_done += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => {
                let error = Error::from(e);
                let req = guard.write_queue.pop_front().unwrap();
                completed.push((req.callback, Err(error)));
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};

    #[test]
    fn send_and_receive_a_datagram() {
        let loop_ = Loop::new().unwrap();
        let a = UdpSocket::bind(&loop_, "127.0.0.1:0".parse().unwrap()).unwrap();
        let b = UdpSocket::bind(&loop_, "127.0.0.1:0".parse().unwrap()).unwrap();
        let b_addr = b.local_addr().unwrap();

        let received = Arc::new(AtomicBool::new(false));
        let received2 = received.clone();
        b.start_read(move |r| {
            if let Ok((bytes, _from)) = r {
                assert_eq!(bytes, b"hello");
                received2.store(true, Ordering::SeqCst);
            }
        })
        .unwrap();

        a.send_to(b"hello".to_vec(), b_addr, |_| {}).unwrap();

        let deadline = Instant::now() + Duration::from_secs(3);
        while !received.load(Ordering::SeqCst) && Instant::now() < deadline {
            loop_.run_once(Some(Duration::from_millis(50))).unwrap();
        }
        assert!(received.load(Ordering::SeqCst));
    }
}
