mod http;
mod raw;
mod socks4;
mod socks5;

pub use http::HttpProxy;
pub use raw::Raw;
pub use socks4::Socks4Proxy;
pub use socks5::Socks5Proxy;

use crate::{utils::SocketAddr, BoxError};

use async_trait::async_trait;
use tokio::net::TcpStream;

/// One hop of an outgoing connection. A hop asks the next entry of the stack
/// for a stream to its own server, then negotiates a tunnel to `addr` over it.
#[async_trait]
pub trait ProxyOutBound: Send + Sync {
    async fn connect(&self, proxies: ProxyStack<'_>, addr: &SocketAddr)
        -> Result<TcpStream, BoxError>;
}

pub type ProxyStack<'a> = Box<dyn Iterator<Item = &'a dyn ProxyOutBound> + Send + 'a>;

/// Dials `addr` through `stack`, which lists hops innermost first.
pub async fn connect_through<'a>(
    stack: &'a [&'a dyn ProxyOutBound],
    addr: &SocketAddr,
) -> Result<TcpStream, BoxError> {
    let mut proxies: ProxyStack<'a> = Box::new(stack.iter().copied().rev());
    proxies
        .next()
        .ok_or("empty proxy stack")?
        .connect(proxies, addr)
        .await
}
