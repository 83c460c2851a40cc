//! A SIP session: dials or accepts a transport, frames messages off of it,
//! and drives a small request/response state machine on top. Grounded in
//! `session.h`/`session.cpp`'s `session` class: `ready -> opening -> open
//! <-> in_transaction -> (open|errored)`.
//!
//! Every transport listener takes the shared state's lock only long enough
//! to mutate state and collect what needs to run next, then drops it
//! before invoking any user callback -- the same take/drop-lock/invoke
//! discipline the reactor uses for resource and timer callbacks, so a
//! callback that turns around and calls back into the session never
//! deadlocks on its own lock.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};

use crate::error::{Error, Result};
use crate::net::{TcpStream, UdpSocket};
use crate::reactor::Loop;
use crate::sip::message::{self, Message};
use crate::sip::method::Method;
use crate::sip::transport::{TcpTransport, Transport, UdpTransport};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SessionState {
    Ready,
    Opening,
    Open,
    InTransaction,
    Errored,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TransportKind {
    Tcp,
    Udp,
}

type ConnectCallback = Box<dyn FnOnce(Result<()>) + Send>;
type RequestCallback = Box<dyn FnOnce(Result<Message>) + Send>;
type MessageListener = Box<dyn FnMut(Message) + Send>;

struct Shared {
    state: SessionState,
    transport: Option<Box<dyn Transport>>,
    connect_callback: Option<ConnectCallback>,
    request_callback: Option<RequestCallback>,
    listeners: HashMap<Method, MessageListener>,
    read_buffer: Vec<u8>,
}

enum Pending {
    RequestDone(Result<Message>),
    Deliver(Method, Message),
}

pub struct Session {
    loop_: Weak<Loop>,
    shared: Arc<Mutex<Shared>>,
}

impl Session {
    pub fn new(loop_: &Arc<Loop>, kind: TransportKind) -> Session {
        let transport: Box<dyn Transport> = match kind {
            TransportKind::Tcp => Box::new(TcpTransport::new()),
            TransportKind::Udp => Box::new(UdpTransport::new()),
        };
        Session::from_transport(loop_, transport, SessionState::Ready)
    }

    /// Wraps a stream a [`crate::net::TcpListener`] already accepted --
    /// already connected, so the session starts `open` and reading right
    /// away instead of waiting through `opening`.
    pub fn from_accepted_tcp(loop_: &Arc<Loop>, tcp: TcpStream) -> Result<Session> {
        let transport = Box::new(TcpTransport::from_accepted(tcp));
        let session = Session::from_transport(loop_, transport, SessionState::Open);
        session.shared.lock().unwrap().transport.as_mut().unwrap().start_reading()?;
        Ok(session)
    }

    /// Wraps a UDP socket already bound for listening.
    pub fn from_bound_udp(loop_: &Arc<Loop>, udp: UdpSocket) -> Result<Session> {
        let transport = Box::new(UdpTransport::from_bound(loop_, udp));
        let session = Session::from_transport(loop_, transport, SessionState::Ready);
        Ok(session)
    }

    fn from_transport(loop_: &Arc<Loop>, mut transport: Box<dyn Transport>, state: SessionState) -> Session {
        let shared = Arc::new(Mutex::new(Shared {
            state,
            transport: None,
            connect_callback: None,
            request_callback: None,
            listeners: HashMap::new(),
            read_buffer: Vec::new(),
        }));
        setup_transport_listeners(transport.as_mut(), &shared);
        shared.lock().unwrap().transport = Some(transport);
        Session {
            loop_: Arc::downgrade(loop_),
            shared,
        }
    }

    pub fn listen(&self, method: Method, callback: impl FnMut(Message) + Send + 'static) {
        self.shared.lock().unwrap().listeners.insert(method, Box::new(callback));
    }

    pub fn open(&self, remote: SocketAddr, callback: impl FnOnce(Result<()>) + Send + 'static) -> Result<()> {
        let loop_ = self.upgrade()?;
        let mut guard = self.shared.lock().unwrap();
        if guard.state != SessionState::Ready {
            return Err(Error::InvalidState);
        }
        guard.state = SessionState::Opening;
        guard.connect_callback = Some(Box::new(callback));
        let transport = guard.transport.as_mut().ok_or(Error::InvalidState)?;
        transport.open(&loop_, remote)
    }

    pub fn request(&self, message: Message, callback: impl FnOnce(Result<Message>) + Send + 'static) -> Result<()> {
        let mut guard = self.shared.lock().unwrap();
        if guard.state != SessionState::Open {
            return Err(Error::InvalidState);
        }
        guard.state = SessionState::InTransaction;
        guard.request_callback = Some(Box::new(callback));
        let bytes = message::write_message(&message)?;
        let transport = guard.transport.as_mut().ok_or(Error::InvalidState)?;
        transport.send(bytes)
    }

    pub fn send(&self, message: Message) -> Result<()> {
        let mut guard = self.shared.lock().unwrap();
        if guard.state != SessionState::Open && guard.state != SessionState::InTransaction {
            return Err(Error::InvalidState);
        }
        let bytes = message::write_message(&message)?;
        let transport = guard.transport.as_mut().ok_or(Error::InvalidState)?;
        transport.send(bytes)
    }

    pub fn close(&self) -> Result<()> {
        let mut guard = self.shared.lock().unwrap();
        if let Some(mut transport) = guard.transport.take() {
            transport.close()?;
        }
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().unwrap().state
    }

    fn upgrade(&self) -> Result<Arc<Loop>> {
        self.loop_.upgrade().ok_or(Error::NoSuchHandle)
    }
}

fn setup_transport_listeners(transport: &mut dyn Transport, shared: &Arc<Mutex<Shared>>) {
    let shared_connect = shared.clone();
    transport.on_connect(Box::new(move |result| {
        let mut guard = shared_connect.lock().unwrap();
        match result {
            Ok(()) => {
                guard.state = SessionState::Open;
                if let Some(transport) = guard.transport.as_mut() {
                    let _ = transport.start_reading();
                }
            }
            Err(_) => {
                guard.state = SessionState::Errored;
                guard.transport = None;
            }
        }
        let callback = guard.connect_callback.take();
        drop(guard);
        if let Some(cb) = callback {
            cb(result);
        }
    }));

    let shared_data = shared.clone();
    transport.on_new_data(Box::new(move |result| {
        let mut guard = shared_data.lock().unwrap();
        let pending = match result {
            Ok(bytes) => {
                guard.read_buffer.extend_from_slice(bytes);
                collect_pending(&mut guard)
            }
            Err(_) => {
                let was_in_transaction = guard.state == SessionState::InTransaction;
                guard.state = SessionState::Errored;
                guard.transport = None;
                if was_in_transaction {
                    vec![Pending::RequestDone(Err(Error::Errored))]
                } else {
                    Vec::new()
                }
            }
        };
        drop(guard);
        dispatch_pending(shared_data.clone(), pending);
    }));

    let shared_write = shared.clone();
    transport.on_write_complete(Box::new(move |result| {
        if result.is_err() {
            let mut guard = shared_write.lock().unwrap();
            let was_in_transaction = guard.state == SessionState::InTransaction;
            guard.state = SessionState::Errored;
            guard.transport = None;
            let callback = if was_in_transaction { guard.request_callback.take() } else { None };
            drop(guard);
            if let Some(cb) = callback {
                cb(Err(Error::Errored));
            }
        }
    }));
}

/// Pulls every complete message out of the accumulated read buffer and
/// figures out, for each, whether it resolves an in-flight request or
/// should go to a method listener -- without running any callback itself.
fn collect_pending(guard: &mut Shared) -> Vec<Pending> {
    let mut messages = Vec::new();
    let mut consumed_total = 0;
    loop {
        match message::read_message(&guard.read_buffer[consumed_total..]) {
            Ok(Some((msg, consumed))) => {
                messages.push(msg);
                consumed_total += consumed;
            }
            Ok(None) => break,
            Err(_) => break,
        }
    }
    if consumed_total > 0 {
        guard.read_buffer.drain(..consumed_total);
    }

    let mut pending = Vec::new();
    for msg in messages {
        if guard.state == SessionState::InTransaction {
            if msg.is_request() {
                // a request while a transaction is pending a response; drop it
                continue;
            }
            guard.state = SessionState::Open;
            pending.push(Pending::RequestDone(Ok(msg)));
        } else if msg.is_request() {
            let method = match msg.start_line() {
                Some(crate::sip::message::StartLine::Request { method, .. }) => *method,
                _ => continue,
            };
            pending.push(Pending::Deliver(method, msg));
        }
    }
    pending
}

fn dispatch_pending(shared: Arc<Mutex<Shared>>, pending: Vec<Pending>) {
    for action in pending {
        match action {
            Pending::RequestDone(result) => {
                let callback = shared.lock().unwrap().request_callback.take();
                if let Some(cb) = callback {
                    cb(result);
                }
            }
            Pending::Deliver(method, msg) => {
                let listener = shared.lock().unwrap().listeners.remove(&method);
                if let Some(mut cb) = listener {
                    cb(msg);
                    shared.lock().unwrap().listeners.insert(method, cb);
                }
            }
        }
    }
}
