//! IPv4 address parsing. IPv6 is an explicit non-goal: `parse_ipv4` rejects
//! anything that isn't a dotted-quad, the same restriction the `bind`/
//! `connect` overloads in `os_interface.h` carry implicitly by taking a
//! plain string and a port.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::error::Error;

pub fn parse_ipv4(ip: &str, port: u16) -> Result<SocketAddr, Error> {
    let addr: Ipv4Addr = ip.parse().map_err(|_| Error::InvalidState)?;
    Ok(SocketAddr::V4(SocketAddrV4::new(addr, port)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dotted_quad() {
        let addr = parse_ipv4("127.0.0.1", 8080).unwrap();
        assert_eq!(addr.port(), 8080);
    }

    #[test]
    fn rejects_non_ipv4() {
        assert!(parse_ipv4("::1", 8080).is_err());
        assert!(parse_ipv4("not-an-ip", 8080).is_err());
    }
}
