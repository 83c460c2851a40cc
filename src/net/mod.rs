pub mod addr;
pub mod datagram;
pub mod local;
pub mod stream;

pub use addr::parse_ipv4;
pub use datagram::UdpSocket;
pub use local::{LocalStream, LocalStreamServer};
pub use stream::{TcpListener, TcpStream};
