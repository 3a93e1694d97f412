cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        mod linux;
        use linux as sys;
    } else if #[cfg(unix)] {
        mod unix;
        use unix as sys;
    } else {
        mod other;
        use other as sys;
    }
}

use crate::IpFamily;

use std::{
    io,
    net::{Shutdown, SocketAddr},
    time::Duration,
};
use tokio::net::{TcpSocket, TcpStream};

use async_trait::async_trait;
use cfg_if::cfg_if;
use socket2::SockRef;

/// Extension function for `TcpStream` for creating a stream whose local address is chosen by the caller
#[async_trait]
pub trait TcpStreamBindExt: Sized {
    // Bind to `local` (if any) and connect to `addr`
    async fn connect_bound(addr: SocketAddr, local: Option<SocketAddr>) -> io::Result<Self>;
}

#[async_trait]
impl TcpStreamBindExt for TcpStream {
    async fn connect_bound(addr: SocketAddr, local: Option<SocketAddr>) -> io::Result<TcpStream> {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };

        if let Some(local) = local {
            log::debug!("binding outgoing socket to {} before connecting to {}", local, addr);
            socket.bind(local)?;
        }

        socket.connect(addr).await
    }
}

/// Extension functions for `TcpStream` for the socket options tokio does not wrap
pub trait TcpStreamOptExt {
    fn set_so_linger(&self, linger: Option<Duration>) -> io::Result<()>;
    fn so_linger(&self) -> io::Result<Option<Duration>>;

    fn set_oob_inline(&self, on: bool) -> io::Result<()>;
    fn oob_inline(&self) -> io::Result<bool>;

    fn set_send_buffer_size(&self, size: usize) -> io::Result<()>;
    fn send_buffer_size(&self) -> io::Result<usize>;

    fn set_recv_buffer_size(&self, size: usize) -> io::Result<()>;
    fn recv_buffer_size(&self) -> io::Result<usize>;

    fn set_keepalive(&self, on: bool) -> io::Result<()>;
    fn keepalive(&self) -> io::Result<bool>;

    fn set_reuse_address(&self, on: bool) -> io::Result<()>;
    fn reuse_address(&self) -> io::Result<bool>;

    // IP_TOS or IPV6_TCLASS, depending on the family of the local address
    //
    // Implementation is platform dependent
    fn set_traffic_class(&self, class: u32) -> io::Result<()>;
    fn traffic_class(&self) -> io::Result<u32>;

    fn shutdown_read(&self) -> io::Result<()>;
}

impl TcpStreamOptExt for TcpStream {
    fn set_so_linger(&self, linger: Option<Duration>) -> io::Result<()> {
        SockRef::from(self).set_linger(linger)
    }

    fn so_linger(&self) -> io::Result<Option<Duration>> {
        SockRef::from(self).linger()
    }

    fn set_oob_inline(&self, on: bool) -> io::Result<()> {
        SockRef::from(self).set_out_of_band_inline(on)
    }

    fn oob_inline(&self) -> io::Result<bool> {
        SockRef::from(self).out_of_band_inline()
    }

    fn set_send_buffer_size(&self, size: usize) -> io::Result<()> {
        SockRef::from(self).set_send_buffer_size(size)
    }

    fn send_buffer_size(&self) -> io::Result<usize> {
        SockRef::from(self).send_buffer_size()
    }

    fn set_recv_buffer_size(&self, size: usize) -> io::Result<()> {
        SockRef::from(self).set_recv_buffer_size(size)
    }

    fn recv_buffer_size(&self) -> io::Result<usize> {
        SockRef::from(self).recv_buffer_size()
    }

    fn set_keepalive(&self, on: bool) -> io::Result<()> {
        SockRef::from(self).set_keepalive(on)
    }

    fn keepalive(&self) -> io::Result<bool> {
        SockRef::from(self).keepalive()
    }

    fn set_reuse_address(&self, on: bool) -> io::Result<()> {
        SockRef::from(self).set_reuse_address(on)
    }

    fn reuse_address(&self) -> io::Result<bool> {
        SockRef::from(self).reuse_address()
    }

    fn set_traffic_class(&self, class: u32) -> io::Result<()> {
        let family = IpFamily::of(&self.local_addr()?);
        sys::set_traffic_class(self, family, class)
    }

    fn traffic_class(&self) -> io::Result<u32> {
        let family = IpFamily::of(&self.local_addr()?);
        sys::traffic_class(self, family)
    }

    fn shutdown_read(&self) -> io::Result<()> {
        SockRef::from(self).shutdown(Shutdown::Read)
    }
}
