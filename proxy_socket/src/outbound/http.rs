use super::{ProxyOutBound, ProxyStack};
use crate::{selector::ProxyAuth, utils::SocketAddr, BoxError};

use base64::Engine;
use bytes::Bytes;
use http_body_util::Empty;
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;

use async_trait::async_trait;

/// Tunnels through an HTTP proxy with `CONNECT`.
pub struct HttpProxy {
    addr: SocketAddr,
    auth: Option<String>,
}

impl HttpProxy {
    pub fn new(addr: SocketAddr, auth: Option<&ProxyAuth>) -> Self {
        let auth = auth.map(|auth| {
            let base64 = base64::engine::general_purpose::STANDARD;
            match &auth.password {
                Some(password) => base64.encode(format!("{}:{}", auth.user, password)),
                None => base64.encode(format!("{}:", auth.user)),
            }
        });

        Self { addr, auth }
    }
}

#[async_trait]
impl ProxyOutBound for HttpProxy {
    async fn connect(
        &self,
        mut proxies: ProxyStack<'_>,
        addr: &SocketAddr,
    ) -> Result<TcpStream, BoxError> {
        let server = proxies
            .next()
            .ok_or("HTTP proxy has no transport below it")?
            .connect(proxies, &self.addr)
            .await?;

        let server = TokioIo::new(server);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(server).await?;
        tokio::spawn(conn.with_upgrades());

        let addr_str = addr.to_string();
        let mut request = Request::builder()
            .method(Method::CONNECT)
            .uri(&addr_str)
            .header("host", &addr_str)
            .header("proxy-connection", "Keep-Alive");
        if let Some(auth) = &self.auth {
            request = request.header("proxy-authorization", format!("Basic {}", auth));
        }
        let request = request.body(Empty::<Bytes>::new())?;

        let response = sender.send_request(request).await?;
        if !response.status().is_success() {
            return Err(format!("proxy {} answered CONNECT with {}", self.addr, response.status()).into());
        }

        // The TLS client speaks first, so the proxy has nothing to say yet.
        let upgraded = hyper::upgrade::on(response).await?;
        let parts = upgraded
            .downcast::<TokioIo<TcpStream>>()
            .map_err(|_| "CONNECT tunnel is not backed by a TCP stream")?;
        if !parts.read_buf.is_empty() {
            return Err(format!("proxy {} sent data before the tunnel was used", self.addr).into());
        }

        Ok(parts.io.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::{connect_through, Raw};

    use std::str::FromStr;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    async fn read_head(stream: &mut TcpStream) -> String {
        let mut head = Vec::new();
        let mut byte = [0; 1];
        while !head.ends_with(b"\r\n\r\n") {
            if stream.read(&mut byte).await.unwrap() == 0 {
                break;
            }
            head.push(byte[0]);
        }
        String::from_utf8(head).unwrap()
    }

    #[tokio::test]
    async fn tunnel_carries_bytes_after_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = SocketAddr::from(listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (mut client, _) = listener.accept().await.unwrap();
            let head = read_head(&mut client).await;
            client
                .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
                .await
                .unwrap();
            let mut hello = [0; 5];
            client.read_exact(&mut hello).await.unwrap();
            (head, hello)
        });

        let auth = ProxyAuth {
            user: "alice".into(),
            password: Some("secret".into()),
        };
        let raw = Raw::new(None);
        let http = HttpProxy::new(proxy_addr, Some(&auth));
        let target = SocketAddr::from_str("broker.example:8883").unwrap();

        let mut stream = connect_through(&[&raw, &http], &target).await.unwrap();
        stream.write_all(b"hello").await.unwrap();

        let (head, hello) = server.await.unwrap();
        assert!(head.starts_with("CONNECT broker.example:8883 HTTP/1.1\r\n"));
        assert!(head.to_ascii_lowercase().contains("proxy-authorization: basic ywxpy2u6c2vjcmv0"));
        assert_eq!(&hello, b"hello");
    }

    #[tokio::test]
    async fn refused_connect_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = SocketAddr::from(listener.local_addr().unwrap());

        tokio::spawn(async move {
            let (mut client, _) = listener.accept().await.unwrap();
            read_head(&mut client).await;
            client
                .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\ncontent-length: 0\r\n\r\n")
                .await
                .unwrap();
        });

        let raw = Raw::new(None);
        let http = HttpProxy::new(proxy_addr, None);
        let target = SocketAddr::from_str("broker.example:8883").unwrap();

        let err = connect_through(&[&raw, &http], &target).await.unwrap_err();
        assert!(err.to_string().contains("407"));
    }
}
