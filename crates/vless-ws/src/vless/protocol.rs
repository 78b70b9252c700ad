use std::{fmt, net::SocketAddr};

use super::Uuid;

/// Transport requested by the client.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RequestCommand {
    Tcp = 0x01,
    Udp = 0x02,
    /// Stream multiplexing. Recognized so the session can answer
    /// "unsupported data" instead of a bare protocol error; never served.
    Mux = 0x03,
}

/// Destination address as carried on the wire: either a literal socket
/// address or a domain name left for the server to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    SocketAddress(SocketAddr),
    DomainNameAddress(String, u16),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::SocketAddress(addr) => write!(f, "{}", addr),
            Address::DomainNameAddress(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

/// Decoded form of the client's first message, minus the residual payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    pub version: u8,
    pub user: Uuid,
    pub command: RequestCommand,
    /// `None` only for [`RequestCommand::Mux`], which carries no target.
    pub address: Option<Address>,
}
