//! # Socket option extensions for tokio
//! Options that `tokio::net::TcpStream` does not expose itself, and a dialer that
//! binds the local address before connecting.

mod tcp;

pub use tcp::{TcpStreamBindExt, TcpStreamOptExt};

use std::{
    fmt::{self, Display, Formatter},
    net::SocketAddr,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IpFamily {
    /// IPv4, traffic class is carried in `IP_TOS`
    V4,

    /// IPv6, traffic class is carried in `IPV6_TCLASS`
    V6,
}

impl IpFamily {
    /// Family of the given address. IPv4-mapped IPv6 addresses count as IPv6,
    /// because the socket itself was created as an IPv6 socket.
    pub fn of(addr: &SocketAddr) -> IpFamily {
        match addr {
            SocketAddr::V4(_) => IpFamily::V4,
            SocketAddr::V6(_) => IpFamily::V6,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            IpFamily::V4 => "ipv4",
            IpFamily::V6 => "ipv6",
        }
    }
}

impl Display for IpFamily {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}
