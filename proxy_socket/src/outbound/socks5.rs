use super::{ProxyOutBound, ProxyStack};
use crate::{
    selector::ProxyAuth,
    utils::{HostName, SocketAddr},
    BoxError,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

/// Tunnels through a SOCKS5 proxy, offering username/password auth when credentials are known.
pub struct Socks5Proxy {
    addr: SocketAddr,
    auth: Option<(String, String)>,
}

impl Socks5Proxy {
    pub fn new(addr: SocketAddr, auth: Option<&ProxyAuth>) -> Result<Self, BoxError> {
        let auth = match auth {
            Some(auth) => {
                let password = auth.password.clone().unwrap_or_default();
                if auth.user.len() > 255 || password.len() > 255 {
                    return Err("SOCKS5 credentials are limited to 255 bytes".into());
                }
                Some((auth.user.clone(), password))
            }
            None => None,
        };

        Ok(Self { addr, auth })
    }
}

#[async_trait]
impl ProxyOutBound for Socks5Proxy {
    async fn connect(
        &self,
        mut proxies: ProxyStack<'_>,
        addr: &SocketAddr,
    ) -> Result<TcpStream, BoxError> {
        let mut server = proxies
            .next()
            .ok_or("SOCKS5 proxy has no transport below it")?
            .connect(proxies, &self.addr)
            .await?;

        if self.auth.is_some() {
            server.write_all(&[5, 2, 0, 2]).await?;
        } else {
            server.write_all(&[5, 1, 0]).await?;
        }
        server.flush().await?;

        if server.read_u8().await? != 5 {
            return Err("SOCKS5 proxy answered with another version".into());
        }
        match (server.read_u8().await?, &self.auth) {
            (0, _) => {}
            (2, Some((user, password))) => {
                server.write_all(&[1, user.len().try_into()?]).await?;
                server.write_all(user.as_bytes()).await?;
                server.write_all(&[password.len().try_into()?]).await?;
                server.write_all(password.as_bytes()).await?;
                server.flush().await?;

                if server.read_u8().await? != 1 {
                    return Err("SOCKS5 authentication reply has another version".into());
                }
                if server.read_u8().await? != 0 {
                    return Err("SOCKS5 proxy rejected the credentials".into());
                }
            }
            _ => return Err("SOCKS5 proxy accepted none of the offered methods".into()),
        }

        server.write_all(&[5, 1, 0]).await?;
        match &addr.hostname {
            HostName::V4(v4) => {
                server.write_all(&[1]).await?;
                server.write_all(&v4.octets()).await?;
            }
            HostName::V6(v6) => {
                server.write_all(&[4]).await?;
                server.write_all(&v6.octets()).await?;
            }
            HostName::Domain(domain) => {
                server.write_all(&[3, domain.len().try_into()?]).await?;
                server.write_all(domain.as_bytes()).await?;
            }
        }
        server.write_all(&addr.port.to_be_bytes()).await?;
        server.flush().await?;

        if server.read_u8().await? != 5 {
            return Err("SOCKS5 reply has another version".into());
        }
        let reply = server.read_u8().await?;
        if reply != 0 {
            return Err(format!("SOCKS5 proxy refused the connection (reply {})", reply).into());
        }
        server.read_u8().await?;
        match server.read_u8().await? {
            1 => {
                server.read_u32().await?;
            }
            3 => {
                let mut buf = vec![0; server.read_u8().await?.into()];
                server.read_exact(&mut buf).await?;
            }
            4 => {
                server.read_u128().await?;
            }
            _ => return Err("SOCKS5 reply has an unknown address type".into()),
        }
        server.read_u16().await?;

        Ok(server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::{connect_through, Raw};

    use std::str::FromStr;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn negotiates_domain_target_with_credentials() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = SocketAddr::from(listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (mut client, _) = listener.accept().await.unwrap();
            let mut greeting = [0; 4];
            client.read_exact(&mut greeting).await.unwrap();
            client.write_all(&[5, 2]).await.unwrap();

            let mut auth = [0; 2 + 3 + 1 + 2];
            client.read_exact(&mut auth).await.unwrap();
            client.write_all(&[1, 0]).await.unwrap();

            let mut request = [0; 4 + 1 + 14 + 2];
            client.read_exact(&mut request).await.unwrap();
            client
                .write_all(&[5, 0, 0, 1, 127, 0, 0, 1, 0x22, 0xb3])
                .await
                .unwrap();
            (greeting, auth, request)
        });

        let auth = ProxyAuth {
            user: "bob".into(),
            password: Some("pw".into()),
        };
        let raw = Raw::new(None);
        let socks = Socks5Proxy::new(proxy_addr, Some(&auth)).unwrap();
        let target = SocketAddr::from_str("broker.example:8883").unwrap();
        connect_through(&[&raw, &socks], &target).await.unwrap();

        let (greeting, auth, request) = server.await.unwrap();
        assert_eq!(greeting, [5, 2, 0, 2]);
        assert_eq!(&auth, b"\x01\x03bob\x02pw");
        assert_eq!(&request[..5], &[5, 1, 0, 3, 14]);
        assert_eq!(&request[5..19], b"broker.example");
        assert_eq!(&request[19..], &8883u16.to_be_bytes());
    }

    #[tokio::test]
    async fn refusal_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = SocketAddr::from(listener.local_addr().unwrap());

        tokio::spawn(async move {
            let (mut client, _) = listener.accept().await.unwrap();
            let mut greeting = [0; 3];
            client.read_exact(&mut greeting).await.unwrap();
            client.write_all(&[5, 0]).await.unwrap();
            let mut request = [0; 4 + 4 + 2];
            client.read_exact(&mut request).await.unwrap();
            client.write_all(&[5, 5, 0, 1, 0, 0, 0, 0, 0, 0]).await.unwrap();
        });

        let raw = Raw::new(None);
        let socks = Socks5Proxy::new(proxy_addr, None).unwrap();
        let target = SocketAddr::from_str("10.1.2.3:8883").unwrap();
        let err = connect_through(&[&raw, &socks], &target).await.unwrap_err();
        assert!(err.to_string().contains("reply 5"));
    }

    #[test]
    fn oversized_credentials_are_rejected() {
        let auth = ProxyAuth {
            user: "u".repeat(256),
            password: None,
        };
        let addr = SocketAddr::from_str("127.0.0.1:1080").unwrap();
        assert!(Socks5Proxy::new(addr, Some(&auth)).is_err());
    }
}
