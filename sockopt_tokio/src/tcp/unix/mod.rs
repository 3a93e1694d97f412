use crate::IpFamily;

use std::io::{self, Error, ErrorKind};
use tokio::net::TcpStream;

use socket2::SockRef;

pub fn set_traffic_class(stream: &TcpStream, family: IpFamily, class: u32) -> io::Result<()> {
    match family {
        IpFamily::V4 => SockRef::from(stream).set_tos(class),
        IpFamily::V6 => Err(Error::new(
            ErrorKind::Unsupported,
            "IPV6_TCLASS is not supported on this platform",
        )),
    }
}

pub fn traffic_class(stream: &TcpStream, family: IpFamily) -> io::Result<u32> {
    match family {
        IpFamily::V4 => SockRef::from(stream).tos(),
        IpFamily::V6 => Err(Error::new(
            ErrorKind::Unsupported,
            "IPV6_TCLASS is not supported on this platform",
        )),
    }
}
