use super::{ProxyOutBound, ProxyStack};
use crate::{
    selector::ProxyAuth,
    utils::{HostName, SocketAddr},
    BoxError,
};

use std::net::Ipv4Addr;

use async_trait::async_trait;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

/// Tunnels through a SOCKS4 proxy. Names and IPv6 targets go out as SOCKS4a.
pub struct Socks4Proxy {
    addr: SocketAddr,
    user_id: Option<String>,
}

impl Socks4Proxy {
    pub fn new(addr: SocketAddr, auth: Option<&ProxyAuth>) -> Result<Self, BoxError> {
        let mut user_id = String::new();
        if let Some(auth) = auth {
            user_id += &auth.user;
            if let Some(password) = &auth.password {
                user_id += ":";
                user_id += password;
            }
        }

        if user_id.contains('\0') {
            return Err("SOCKS4 user id must not contain NUL".into());
        }
        let user_id = if !user_id.is_empty() { Some(user_id) } else { None };

        Ok(Self { addr, user_id })
    }
}

#[async_trait]
impl ProxyOutBound for Socks4Proxy {
    async fn connect(
        &self,
        mut proxies: ProxyStack<'_>,
        addr: &SocketAddr,
    ) -> Result<TcpStream, BoxError> {
        let ip;
        let mut hostname = None;
        match &addr.hostname {
            HostName::V4(v4) => {
                let v4_integer = u32::from_be_bytes(v4.octets());
                if v4_integer & 0xFFFFFF00 == 0 && v4_integer & 0xFF != 0 {
                    return Err("target address collides with the SOCKS4a marker range".into());
                }
                ip = *v4
            }
            HostName::V6(v6) => {
                ip = Ipv4Addr::new(0, 0, 0, 1);
                hostname = Some(v6.to_string());
            }
            HostName::Domain(domain) => {
                ip = Ipv4Addr::new(0, 0, 0, 1);
                if domain.contains('\0') {
                    return Err("target name must not contain NUL".into());
                }
                hostname = Some(domain.clone());
            }
        }

        let mut server = proxies
            .next()
            .ok_or("SOCKS4 proxy has no transport below it")?
            .connect(proxies, &self.addr)
            .await?;

        server.write_all(&[4, 1]).await?;
        server.write_all(&addr.port.to_be_bytes()).await?;
        server.write_all(&ip.octets()).await?;
        if let Some(user_id) = &self.user_id {
            server.write_all(user_id.as_bytes()).await?
        }
        server.write_all(b"\0").await?;
        if let Some(hostname) = &hostname {
            server.write_all(hostname.as_bytes()).await?;
            server.write_all(b"\0").await?;
        }
        server.flush().await?;

        if server.read_u8().await? != 0 {
            return Err("SOCKS4 reply has an unexpected version".into());
        }
        let status = server.read_u8().await?;
        if status != 90 {
            return Err(format!("SOCKS4 proxy refused the connection (status {})", status).into());
        }
        let mut buf = [0; 6];
        server.read_exact(&mut buf).await?;

        Ok(server)
    }
}
