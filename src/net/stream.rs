//! TCP stream sockets and listeners riding the generic [`StreamIo`] engine.
//!
//! Non-blocking `connect` is done with a raw `socket(2)`/`connect(2)` pair
//! rather than `std::net::TcpStream::connect` (which blocks): the socket is
//! created `O_NONBLOCK` up front, and `EINPROGRESS` is handed to
//! [`StreamIo::connecting`] to finalize once writable. IPv6 is out of
//! scope, matching `parse_ipv4`.

use std::io;
use std::mem;
use std::net::{SocketAddr, SocketAddrV4, TcpListener as StdTcpListener, TcpStream as StdTcpStream};
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::sync::{Arc, Weak};

use std::time::Duration;

use crate::error::{Error, Result};
use crate::future::Future;
use crate::handle::Handle;
use crate::io::StreamIo;
use crate::reactor::Loop;
use crate::ready::Ready;

pub struct TcpStream {
    io: StreamIo<StdTcpStream>,
}

impl TcpStream {
    pub fn connect(
        loop_: &Arc<Loop>,
        addr: SocketAddr,
        on_connect: impl FnOnce(Result<()>) + Send + 'static,
    ) -> Result<TcpStream> {
        let (stream, in_progress) = nonblocking_connect(addr)?;
        let io = if in_progress {
            StreamIo::connecting(loop_, stream, on_connect)?
        } else {
            let io = StreamIo::connected(loop_, stream)?;
            Future::execute(loop_, Duration::from_millis(0), move || on_connect(Ok(())))?;
            io
        };
        Ok(TcpStream { io })
    }

    /// Adopt a socket accepted by a [`TcpListener`] (already connected,
    /// already non-blocking).
    pub(crate) fn from_accepted(loop_: &Arc<Loop>, stream: StdTcpStream) -> Result<TcpStream> {
        Ok(TcpStream {
            io: StreamIo::connected(loop_, stream)?,
        })
    }

    pub fn start_read(&self, callback: impl FnMut(Result<&[u8]>) + Send + 'static) -> Result<()> {
        self.io.start_read(callback)
    }

    pub fn stop_read(&self) -> Result<()> {
        self.io.stop_read()
    }

    pub fn write(&self, data: Vec<u8>, callback: impl FnOnce(Result<()>) + Send + 'static) -> Result<()> {
        self.io.write(data, callback)
    }

    pub fn close(&self) -> Result<()> {
        self.io.close()
    }
}

pub struct TcpListener {
    loop_: Weak<Loop>,
    listener: StdTcpListener,
    resource: Handle,
}

impl TcpListener {
    pub fn bind(
        loop_: &Arc<Loop>,
        addr: SocketAddr,
        mut on_accept: impl FnMut(Result<TcpStream>) + Send + 'static,
    ) -> Result<Arc<TcpListener>> {
        let listener = StdTcpListener::bind(addr).map_err(Error::from)?;
        listener.set_nonblocking(true).map_err(Error::from)?;

        let weak_loop = Arc::downgrade(loop_);
        let accepting = listener.try_clone().map_err(Error::from)?;
        let resource = loop_.add_resource(
            listener.as_raw_fd(),
            Ready::READABLE,
            Box::new(move |_h, _r| {
                accept_ready(&weak_loop, &accepting, &mut on_accept);
            }),
        )?;

        Ok(Arc::new(TcpListener {
            loop_: Arc::downgrade(loop_),
            listener,
            resource,
        }))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn close(&self) -> Result<()> {
        let loop_ = self.loop_.upgrade().ok_or(Error::NoSuchHandle)?;
        loop_.remove_resource(self.resource)
    }
}

fn accept_ready(
    loop_: &Weak<Loop>,
    listener: &StdTcpListener,
    on_accept: &mut (dyn FnMut(Result<TcpStream>) + Send),
) {
    let Some(loop_arc) = loop_.upgrade() else { return };
    loop {
        match listener.accept() {
            Ok((stream, _addr)) => {
                if let Err(e) = stream.set_nonblocking(true) {
                    on_accept(Err(Error::from(e)));
                    continue;
                }
                match TcpStream::from_accepted(&loop_arc, stream) {
                    Ok(tcp) => on_accept(Ok(tcp)),
                    Err(e) => on_accept(Err(e)),
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => {
                on_accept(Err(Error::from(e)));
                break;
            }
        }
    }
}

fn nonblocking_connect(addr: SocketAddr) -> Result<(StdTcpStream, bool)> {
    let v4 = match addr {
        SocketAddr::V4(v4) => v4,
        SocketAddr::V6(_) => return Err(Error::InvalidState),
    };

    unsafe {
        let fd = libc::socket(
            libc::AF_INET,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
        );
        if fd < 0 {
            return Err(Error::from(io::Error::last_os_error()));
        }

        let sockaddr = to_sockaddr_in(&v4);
        let ret = libc::connect(
            fd,
            &sockaddr as *const _ as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        );

        if ret == 0 {
            Ok((StdTcpStream::from_raw_fd(fd), false))
        } else {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINPROGRESS) {
                Ok((StdTcpStream::from_raw_fd(fd), true))
            } else {
                libc::close(fd);
                Err(Error::from(err))
            }
        }
    }
}

fn to_sockaddr_in(addr: &SocketAddrV4) -> libc::sockaddr_in {
    libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: addr.port().to_be(),
        sin_addr: libc::in_addr {
            s_addr: u32::from_ne_bytes(addr.ip().octets()),
        },
        sin_zero: [0; 8],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};

    #[test]
    fn connect_and_echo_roundtrip() {
        let loop_ = Loop::new().unwrap();

        let echoed = Arc::new(AtomicBool::new(false));
        let echoed2 = echoed.clone();

        let server = TcpListener::bind(
            &loop_,
            "127.0.0.1:0".parse().unwrap(),
            move |accepted| {
                let tcp = accepted.unwrap();
                let tcp = Arc::new(tcp);
                let tcp2 = tcp.clone();
                tcp.start_read(move |data| {
                    if let Ok(bytes) = data {
                        let _ = tcp2.write(bytes.to_vec(), |_| {});
                    }
                })
                .unwrap();
                // keep the accepted socket alive for the test's duration
                std::mem::forget(tcp);
            },
        )
        .unwrap();

        let addr = server.local_addr().unwrap();
        let connected = Arc::new(AtomicBool::new(false));
        let connected2 = connected.clone();
        let client = TcpStream::connect(&loop_, addr, move |r| {
            connected2.store(r.is_ok(), Ordering::SeqCst);
        })
        .unwrap();
        let client = Arc::new(client);

        let deadline = Instant::now() + Duration::from_secs(3);
        while !connected.load(Ordering::SeqCst) && Instant::now() < deadline {
            loop_.run_once(Some(Duration::from_millis(50))).unwrap();
        }
        assert!(connected.load(Ordering::SeqCst));

        let client2 = client.clone();
        client
            .start_read(move |data| {
                if data.is_ok() {
                    echoed2.store(true, Ordering::SeqCst);
                }
                let _ = &client2;
            })
            .unwrap();
        client.write(b"ping".to_vec(), |_| {}).unwrap();

        let deadline = Instant::now() + Duration::from_secs(3);
        while !echoed.load(Ordering::SeqCst) && Instant::now() < deadline {
            loop_.run_once(Some(Duration::from_millis(50))).unwrap();
        }
        assert!(echoed.load(Ordering::SeqCst));
    }
}
