use crate::IpFamily;

use std::{
    io::{self, Error},
    mem,
    os::fd::AsRawFd,
};
use tokio::net::TcpStream;

use socket2::SockRef;

pub fn set_traffic_class(stream: &TcpStream, family: IpFamily, class: u32) -> io::Result<()> {
    match family {
        IpFamily::V4 => SockRef::from(stream).set_tos(class),
        IpFamily::V6 => {
            let fd = stream.as_raw_fd();
            let value = class as libc::c_int;

            unsafe {
                let ret = libc::setsockopt(
                    fd,
                    libc::IPPROTO_IPV6,
                    libc::IPV6_TCLASS,
                    &value as *const _ as *const _,
                    mem::size_of_val(&value) as libc::socklen_t,
                );

                if ret != 0 {
                    return Err(Error::last_os_error());
                }
            }

            Ok(())
        }
    }
}

pub fn traffic_class(stream: &TcpStream, family: IpFamily) -> io::Result<u32> {
    match family {
        IpFamily::V4 => SockRef::from(stream).tos(),
        IpFamily::V6 => {
            let fd = stream.as_raw_fd();
            let mut value: libc::c_int = 0;
            let mut len = mem::size_of_val(&value) as libc::socklen_t;

            unsafe {
                let ret = libc::getsockopt(
                    fd,
                    libc::IPPROTO_IPV6,
                    libc::IPV6_TCLASS,
                    &mut value as *mut _ as *mut _,
                    &mut len,
                );

                if ret != 0 {
                    return Err(Error::last_os_error());
                }
            }

            Ok(value as u32)
        }
    }
}
