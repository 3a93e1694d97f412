use super::{ProxyOutBound, ProxyStack};
use crate::{utils::SocketAddr, BoxError};

use sockopt_tokio::TcpStreamBindExt;
use tokio::net::TcpStream;

use async_trait::async_trait;

/// The innermost hop: a plain TCP connection, optionally from a fixed local address.
pub struct Raw {
    bind: Option<std::net::SocketAddr>,
}

impl Raw {
    pub fn new(bind: Option<std::net::SocketAddr>) -> Self {
        Self { bind }
    }
}

#[async_trait]
impl ProxyOutBound for Raw {
    async fn connect(
        &self,
        mut proxies: ProxyStack<'_>,
        addr: &SocketAddr,
    ) -> Result<TcpStream, BoxError> {
        if let Some(proxy) = proxies.next() {
            return proxy.connect(proxies, addr).await;
        }

        let mut last_err = None;
        for target in addr.resolve_all().await? {
            match TcpStream::connect_bound(target, self.bind).await {
                Ok(server) => return Ok(server),
                Err(err) => last_err = Some(err),
            }
        }

        Err(match last_err {
            Some(err) => err.into(),
            None => format!("{} did not resolve to any address", addr).into(),
        })
    }
}
