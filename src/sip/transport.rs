//! Transport abstraction a [`crate::sip::session::Session`] drives without
//! caring whether it's talking over a stream or a datagram socket.
//! Grounded in `session.h`/`session.cpp`'s `transport`/`tcp_transport`/
//! `udp_transport`: three listener slots (connect, new data, write
//! complete) and four operations (open/start_reading/send/close).

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};

use crate::error::{Error, Result};
use crate::net::{TcpStream, UdpSocket};
use crate::reactor::Loop;

pub type ConnectListener = Box<dyn FnMut(Result<()>) + Send>;
pub type DataListener = Box<dyn FnMut(Result<&[u8]>) + Send>;
pub type WriteListener = Box<dyn FnMut(Result<()>) + Send>;

pub trait Transport: Send {
    fn on_connect(&mut self, listener: ConnectListener);
    fn on_new_data(&mut self, listener: DataListener);
    fn on_write_complete(&mut self, listener: WriteListener);

    fn open(&mut self, loop_: &Arc<Loop>, remote: SocketAddr) -> Result<()>;
    fn start_reading(&mut self) -> Result<()>;
    fn send(&mut self, data: Vec<u8>) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

pub struct TcpTransport {
    tcp: Option<Arc<TcpStream>>,
    connect_listener: Arc<Mutex<Option<ConnectListener>>>,
    data_listener: Arc<Mutex<Option<DataListener>>>,
    write_listener: Arc<Mutex<Option<WriteListener>>>,
}

impl TcpTransport {
    pub fn new() -> TcpTransport {
        TcpTransport {
            tcp: None,
            connect_listener: Arc::new(Mutex::new(None)),
            data_listener: Arc::new(Mutex::new(None)),
            write_listener: Arc::new(Mutex::new(None)),
        }
    }

    /// Wraps a socket a [`crate::net::TcpListener`] already accepted, so a
    /// session can be built around an inbound connection instead of one it
    /// dials out itself.
    pub fn from_accepted(tcp: TcpStream) -> TcpTransport {
        let mut transport = TcpTransport::new();
        transport.tcp = Some(Arc::new(tcp));
        transport
    }
}

impl Default for TcpTransport {
    fn default() -> TcpTransport {
        TcpTransport::new()
    }
}

impl Transport for TcpTransport {
    fn on_connect(&mut self, listener: ConnectListener) {
        *self.connect_listener.lock().unwrap() = Some(listener);
    }

    fn on_new_data(&mut self, listener: DataListener) {
        *self.data_listener.lock().unwrap() = Some(listener);
    }

    fn on_write_complete(&mut self, listener: WriteListener) {
        *self.write_listener.lock().unwrap() = Some(listener);
    }

    fn open(&mut self, loop_: &Arc<Loop>, remote: SocketAddr) -> Result<()> {
        let connect_listener = self.connect_listener.clone();
        let tcp = TcpStream::connect(loop_, remote, move |r| {
            if let Some(cb) = connect_listener.lock().unwrap().as_mut() {
                cb(r);
            }
        })?;
        self.tcp = Some(Arc::new(tcp));
        Ok(())
    }

    fn start_reading(&mut self) -> Result<()> {
        let tcp = self.tcp.as_ref().ok_or(Error::InvalidState)?;
        let data_listener = self.data_listener.clone();
        tcp.start_read(move |data| {
            if let Some(cb) = data_listener.lock().unwrap().as_mut() {
                cb(data);
            }
        })
    }

    fn send(&mut self, data: Vec<u8>) -> Result<()> {
        let tcp = self.tcp.as_ref().ok_or(Error::InvalidState)?;
        let write_listener = self.write_listener.clone();
        tcp.write(data, move |r| {
            if let Some(cb) = write_listener.lock().unwrap().as_mut() {
                cb(r);
            }
        })
    }

    fn close(&mut self) -> Result<()> {
        if let Some(tcp) = self.tcp.take() {
            tcp.close()
        } else {
            Ok(())
        }
    }
}

pub struct UdpTransport {
    loop_: Weak<Loop>,
    udp: Option<Arc<UdpSocket>>,
    remote: Option<SocketAddr>,
    connect_listener: Arc<Mutex<Option<ConnectListener>>>,
    data_listener: Arc<Mutex<Option<DataListener>>>,
    write_listener: Arc<Mutex<Option<WriteListener>>>,
}

impl UdpTransport {
    pub fn new() -> UdpTransport {
        UdpTransport {
            loop_: Weak::new(),
            udp: None,
            remote: None,
            connect_listener: Arc::new(Mutex::new(None)),
            data_listener: Arc::new(Mutex::new(None)),
            write_listener: Arc::new(Mutex::new(None)),
        }
    }

    /// Wraps a socket already bound for listening, analogous to
    /// [`TcpTransport::from_accepted`].
    pub fn from_bound(loop_: &Arc<Loop>, udp: UdpSocket) -> UdpTransport {
        let mut transport = UdpTransport::new();
        transport.loop_ = Arc::downgrade(loop_);
        transport.udp = Some(Arc::new(udp));
        transport
    }
}

impl Default for UdpTransport {
    fn default() -> UdpTransport {
        UdpTransport::new()
    }
}

impl Transport for UdpTransport {
    fn on_connect(&mut self, listener: ConnectListener) {
        *self.connect_listener.lock().unwrap() = Some(listener);
    }

    fn on_new_data(&mut self, listener: DataListener) {
        *self.data_listener.lock().unwrap() = Some(listener);
    }

    fn on_write_complete(&mut self, listener: WriteListener) {
        *self.write_listener.lock().unwrap() = Some(listener);
    }

    /// UDP has no handshake: a "connect" is just remembering the peer
    /// address, so success is reported unconditionally, deferred through a
    /// zero-delay future like every other completion in this crate.
    fn open(&mut self, loop_: &Arc<Loop>, remote: SocketAddr) -> Result<()> {
        if self.udp.is_none() {
            let local: SocketAddr = "0.0.0.0:0".parse().unwrap();
            self.udp = Some(Arc::new(UdpSocket::bind(loop_, local)?));
        }
        self.loop_ = Arc::downgrade(loop_);
        self.remote = Some(remote);

        let connect_listener = self.connect_listener.clone();
        crate::future::Future::execute(loop_, std::time::Duration::from_millis(0), move || {
            if let Some(cb) = connect_listener.lock().unwrap().as_mut() {
                cb(Ok(()));
            }
        })?;
        Ok(())
    }

    fn start_reading(&mut self) -> Result<()> {
        let udp = self.udp.as_ref().ok_or(Error::InvalidState)?;
        let data_listener = self.data_listener.clone();
        udp.start_read(move |r| {
            let mapped = r.map(|(bytes, _from)| bytes);
            if let Some(cb) = data_listener.lock().unwrap().as_mut() {
                cb(mapped);
            }
        })
    }

    fn send(&mut self, data: Vec<u8>) -> Result<()> {
        let udp = self.udp.as_ref().ok_or(Error::InvalidState)?;
        let remote = self.remote.ok_or(Error::InvalidState)?;
        let write_listener = self.write_listener.clone();
        udp.send_to(data, remote, move |r| {
            if let Some(cb) = write_listener.lock().unwrap().as_mut() {
                cb(r);
            }
        })
    }

    fn close(&mut self) -> Result<()> {
        if let Some(udp) = self.udp.take() {
            udp.close()
        } else {
            Ok(())
        }
    }
}
