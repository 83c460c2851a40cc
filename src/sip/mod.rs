//! A small SIP (RFC 3261) message and session layer built on the loop's
//! TCP/UDP primitives. Grounded in `looper_sip.h`/`message.cpp`/
//! `session.cpp`: header/body type registration, message framing over a
//! byte stream, and a request/response session state machine. Full
//! SIP-URI and SDP grammar are out of scope -- values round-trip as raw
//! strings except where a concrete header type gives them real structure.

pub mod bodies;
pub mod headers;
pub mod message;
pub mod method;
pub mod registry;
pub mod session;
pub mod status_code;
pub mod transport;

pub use bodies::{Body, GenericBody};
pub use headers::{GenericHeader, Header};
pub use message::{Message, StartLine};
pub use method::Method;
pub use registry::{register_body, register_header};
pub use session::{Session, SessionState, TransportKind};
pub use status_code::StatusCode;
pub use transport::{TcpTransport, Transport, UdpTransport};
