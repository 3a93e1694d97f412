use crate::{
    config::Config,
    layer::SecureStreamFactory,
    selector::{ProxySelector, StaticProxySelector},
    socket::DeferredTlsSocket,
    utils::{HostName, SocketAddr},
    Error,
};

use std::{io, sync::Arc, time::Duration};

use log::debug;
use tokio::net::TcpStream;

/// Drop-in secure socket factory that routes connections it originates through
/// the proxies `selector` names. Everything else goes straight to `base`.
pub struct ProxyAwareTlsFactory<F: SecureStreamFactory> {
    base: Arc<F>,
    selector: Option<Arc<dyn ProxySelector>>,
    connect_timeout: Option<Duration>,
}

impl<F: SecureStreamFactory> Clone for ProxyAwareTlsFactory<F> {
    fn clone(&self) -> Self {
        Self {
            base: self.base.clone(),
            selector: self.selector.clone(),
            connect_timeout: self.connect_timeout,
        }
    }
}

impl<F: SecureStreamFactory> ProxyAwareTlsFactory<F> {
    pub fn new(base: Arc<F>, selector: Option<Arc<dyn ProxySelector>>) -> Self {
        Self {
            base,
            selector,
            connect_timeout: None,
        }
    }

    /// Bounds each connection attempt made by `create_secure_socket`.
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// A factory using the proxies and timeout of `config`.
    pub fn from_config(base: Arc<F>, config: &Config) -> Result<Self, Error> {
        let selector: Arc<dyn ProxySelector> = Arc::new(StaticProxySelector::try_from(config)?);
        Ok(Self::new(base, Some(selector)).with_connect_timeout(config.connect_timeout()))
    }

    /// An unconnected socket, for callers that set options before connecting.
    pub fn create_socket(&self) -> DeferredTlsSocket<F> {
        DeferredTlsSocket::new(self.base.clone(), self.selector.clone())
    }

    /// A socket connected to `host:port`, through a proxy where one applies.
    pub async fn create_secure_socket(&self, host: &str, port: u16) -> Result<DeferredTlsSocket<F>, Error> {
        let host: HostName = host
            .parse()
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", host, e)))?;
        let target = SocketAddr::new(host, port);
        debug!("Creating a secure socket to {}", target);

        let mut socket = self.create_socket();
        socket.connect(&target, self.connect_timeout).await?;
        Ok(socket)
    }

    pub async fn wrap_socket(
        &self,
        raw: TcpStream,
        host: &str,
        port: u16,
        auto_close: bool,
    ) -> io::Result<F::Stream> {
        let host = parse_host(host)?;
        self.base.wrap(raw, &host, port, auto_close).await
    }

    /// Connects directly from `local`, without proxies.
    pub async fn create_secure_socket_bound(
        &self,
        host: &str,
        port: u16,
        local: std::net::SocketAddr,
    ) -> io::Result<F::Stream> {
        let host = parse_host(host)?;
        let addr = resolve(&host, port).await?;
        self.base.connect_direct(&host, addr, Some(local)).await
    }

    /// Connects directly to a known address, without proxies.
    pub async fn create_secure_socket_to(&self, addr: std::net::SocketAddr) -> io::Result<F::Stream> {
        self.base.connect_direct(&addr.ip().into(), addr, None).await
    }

    pub fn default_cipher_suites(&self) -> Vec<String> {
        self.base.default_cipher_suites()
    }

    pub fn supported_cipher_suites(&self) -> Vec<String> {
        self.base.supported_cipher_suites()
    }
}

fn parse_host(host: &str) -> io::Result<HostName> {
    host.parse().map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a valid host: {}", host, e),
        )
    })
}

async fn resolve(host: &HostName, port: u16) -> io::Result<std::net::SocketAddr> {
    SocketAddr::new(host.clone(), port)
        .resolve()
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::NotFound, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        selector::Proxy,
        testing::{FakeHttpProxy, RecordingFactory},
    };

    use hyper::Uri;
    use std::sync::atomic::Ordering;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn created_sockets_go_through_the_selector() {
        let proxy = FakeHttpProxy::start("200 Connection established").await;
        let proxy_addr = proxy.addr;
        let selector: Arc<dyn ProxySelector> =
            Arc::new(move |_: &Uri| vec![Proxy::http(proxy_addr.into())]);
        let base = Arc::new(RecordingFactory::default());
        let factory = ProxyAwareTlsFactory::new(base.clone(), Some(selector));

        let socket = factory.create_secure_socket("127.0.0.1", 8883).await.unwrap();
        assert!(socket.is_connected());
        assert_eq!(proxy.hits(), 1);
        assert_eq!(base.wraps.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unconnected_sockets_defer_options() {
        let base = Arc::new(RecordingFactory::default());
        let factory = ProxyAwareTlsFactory::new(base.clone(), None);

        let mut socket = factory.create_socket();
        socket.set_keepalive(true).unwrap();
        assert!(!socket.is_connected());
        assert!(base.calls().is_empty());
    }

    #[tokio::test]
    async fn explicit_paths_skip_the_proxies() {
        let proxy = FakeHttpProxy::start("200 Connection established").await;
        let proxy_addr = proxy.addr;
        let selector: Arc<dyn ProxySelector> =
            Arc::new(move |_: &Uri| vec![Proxy::http(proxy_addr.into())]);
        let base = Arc::new(RecordingFactory::default());
        let factory = ProxyAwareTlsFactory::new(base.clone(), Some(selector));

        factory
            .create_secure_socket_to("127.0.0.1:9".parse().unwrap())
            .await
            .unwrap();
        factory
            .create_secure_socket_bound("localhost", 9, "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(base.directs.load(Ordering::SeqCst), 2);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let raw = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        factory.wrap_socket(raw, "broker.example", 8883, false).await.unwrap();
        assert_eq!(base.wraps.load(Ordering::SeqCst), 1);
        assert_eq!(proxy.hits(), 0);

        assert_eq!(factory.default_cipher_suites(), ["FACTORY_SUITE"]);
        assert_eq!(factory.supported_cipher_suites().len(), 2);
    }

    #[tokio::test]
    async fn invalid_hosts_are_rejected() {
        let factory = ProxyAwareTlsFactory::new(Arc::new(RecordingFactory::default()), None);
        let err = factory.create_secure_socket("bad host", 443).await.err().unwrap();
        assert!(matches!(err, Error::InvalidAddress(_)));
    }

    #[test]
    fn config_wires_timeout_and_selector() {
        let config = Config::from_json5(
            r#"{ proxies: [{ protocol: "socks5", server: "proxy.corp:1080" }], connect_timeout_ms: 250 }"#,
        )
        .unwrap();
        let factory =
            ProxyAwareTlsFactory::from_config(Arc::new(RecordingFactory::default()), &config).unwrap();
        assert_eq!(factory.connect_timeout, Some(Duration::from_millis(250)));
        assert!(factory.selector.is_some());
    }
}
