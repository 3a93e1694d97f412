use crate::IpFamily;

use std::io::{self, Error, ErrorKind};
use tokio::net::TcpStream;

pub fn set_traffic_class(_stream: &TcpStream, family: IpFamily, _class: u32) -> io::Result<()> {
    let err = Error::new(
        ErrorKind::Unsupported,
        format!("{} traffic class is not supported on this platform", family),
    );
    Err(err)
}

pub fn traffic_class(_stream: &TcpStream, family: IpFamily) -> io::Result<u32> {
    let err = Error::new(
        ErrorKind::Unsupported,
        format!("{} traffic class is not supported on this platform", family),
    );
    Err(err)
}
