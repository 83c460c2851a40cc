//! UNIX-domain stream sockets, sharing the same [`StreamIo`] engine as
//! [`crate::net::stream`]. The original keeps near-duplicate TCP and UNIX
//! implementations; collapsing them onto one generic engine is a
//! deliberate simplification recorded in the design ledger.

use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::os::unix::net::{UnixListener as StdUnixListener, UnixStream as StdUnixStream};
use std::path::Path;
use std::sync::{Arc, Weak};

use std::time::Duration;

use crate::error::{Error, Result};
use crate::future::Future;
use crate::handle::Handle;
use crate::io::StreamIo;
use crate::reactor::Loop;
use crate::ready::Ready;

pub struct LocalStream {
    io: StreamIo<StdUnixStream>,
}

impl LocalStream {
    pub fn connect(
        loop_: &Arc<Loop>,
        path: impl AsRef<Path>,
        on_connect: impl FnOnce(Result<()>) + Send + 'static,
    ) -> Result<LocalStream> {
        let (stream, in_progress) = nonblocking_connect(path.as_ref())?;
        let io = if in_progress {
            StreamIo::connecting(loop_, stream, on_connect)?
        } else {
            let io = StreamIo::connected(loop_, stream)?;
            Future::execute(loop_, Duration::from_millis(0), move || on_connect(Ok(())))?;
            io
        };
        Ok(LocalStream { io })
    }

    pub(crate) fn from_accepted(loop_: &Arc<Loop>, stream: StdUnixStream) -> Result<LocalStream> {
        Ok(LocalStream {
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

pub struct LocalStreamServer {
    loop_: Weak<Loop>,
    listener: StdUnixListener,
    resource: Handle,
}

impl LocalStreamServer {
    pub fn bind(
        loop_: &Arc<Loop>,
        path: impl AsRef<Path>,
        mut on_accept: impl FnMut(Result<LocalStream>) + Send + 'static,
    ) -> Result<Arc<LocalStreamServer>> {
        let listener = StdUnixListener::bind(path).map_err(Error::from)?;
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

        Ok(Arc::new(LocalStreamServer {
            loop_: Arc::downgrade(loop_),
            listener,
            resource,
        }))
    }

    pub fn close(&self) -> Result<()> {
        let loop_ = self.loop_.upgrade().ok_or(Error::NoSuchHandle)?;
        loop_.remove_resource(self.resource)
    }
}

fn accept_ready(
    loop_: &Weak<Loop>,
    listener: &StdUnixListener,
    on_accept: &mut (dyn FnMut(Result<LocalStream>) + Send),
) {
    let Some(loop_arc) = loop_.upgrade() else { return };
    loop {
        match listener.accept() {
            Ok((stream, _addr)) => {
                if let Err(e) = stream.set_nonblocking(true) {
                    on_accept(Err(Error::from(e)));
                    continue;
                }
                match LocalStream::from_accepted(&loop_arc, stream) {
                    Ok(s) => on_accept(Ok(s)),
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

fn nonblocking_connect(path: &Path) -> Result<(StdUnixStream, bool)> {
    let bytes = path.as_os_str().as_encoded_bytes();
    if bytes.len() >= 108 {
        return Err(Error::InvalidState);
    }

    unsafe {
        let fd = libc::socket(
            libc::AF_UNIX,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
        );
        if fd < 0 {
            return Err(Error::from(io::Error::last_os_error()));
        }

        let mut addr: libc::sockaddr_un = mem::zeroed();
        addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
        for (dst, src) in addr.sun_path.iter_mut().zip(bytes.iter()) {
            *dst = *src as libc::c_char;
        }

        let len = (mem::size_of::<libc::sa_family_t>() + bytes.len() + 1) as libc::socklen_t;
        let ret = libc::connect(fd, &addr as *const _ as *const libc::sockaddr, len);

        if ret == 0 {
            Ok((StdUnixStream::from_raw_fd(fd), false))
        } else {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINPROGRESS) {
                Ok((StdUnixStream::from_raw_fd(fd), true))
            } else {
                libc::close(fd);
                Err(Error::from(err))
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
    fn connect_and_echo_roundtrip() {
        let dir = std::env::temp_dir().join(format!("loopio-test-{}.sock", std::process::id()));
        let _ = std::fs::remove_file(&dir);

        let loop_ = Loop::new().unwrap();
        let echoed = Arc::new(AtomicBool::new(false));
        let echoed2 = echoed.clone();

        let server = LocalStreamServer::bind(&loop_, &dir, move |accepted| {
            let stream = Arc::new(accepted.unwrap());
            let stream2 = stream.clone();
            stream
                .start_read(move |data| {
                    if let Ok(bytes) = data {
                        let _ = stream2.write(bytes.to_vec(), |_| {});
                    }
                })
                .unwrap();
            std::mem::forget(stream);
        })
        .unwrap();
        let _ = &server;

        let connected = Arc::new(AtomicBool::new(false));
        let connected2 = connected.clone();
        let client = LocalStream::connect(&loop_, &dir, move |r| {
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
        let _ = std::fs::remove_file(&dir);
    }
}
