use super::{
    HandshakeListener, PerformancePreferences, SecureStream, SecureStreamFactory, TlsSession,
};
use crate::utils::HostName;

use std::{
    future::Future,
    io, mem,
    net::{IpAddr, SocketAddr},
    pin::Pin,
    sync::Arc,
    task::{ready, Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use log::{debug, warn};
use once_cell::sync::Lazy;
use sockopt_tokio::{TcpStreamBindExt, TcpStreamOptExt};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf},
    net::TcpStream,
    time::{Instant, Sleep},
};
use tokio_rustls::{
    client::TlsStream,
    rustls::{
        self,
        crypto::{ring, CryptoProvider},
        pki_types::ServerName,
        ClientConfig, ProtocolVersion, RootCertStore, SupportedCipherSuite,
        SupportedProtocolVersion,
    },
    Connect, TlsConnector,
};

static NATIVE_ROOTS: Lazy<Arc<RootCertStore>> = Lazy::new(|| {
    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        warn!("Could not load a native root certificate: {}", err);
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    debug!("Loaded {} native root certificates, ignored {}", added, ignored);
    Arc::new(roots)
});

/// How late a read deadline may be observed and still count as expired.
const STALE_DEADLINE_SLACK: Duration = Duration::from_millis(25);

fn suite_name(suite: &SupportedCipherSuite) -> String {
    format!("{:?}", suite.suite())
}

fn protocol_name(version: ProtocolVersion) -> Option<&'static str> {
    match version {
        ProtocolVersion::TLSv1_2 => Some("TLSv1.2"),
        ProtocolVersion::TLSv1_3 => Some("TLSv1.3"),
        _ => None,
    }
}

fn invalid_input(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg)
}

/// TLS client transports on tokio-rustls with the ring provider.
#[derive(Clone)]
pub struct RustlsStreamFactory {
    provider: Arc<CryptoProvider>,
    roots: Arc<RootCertStore>,
}

impl RustlsStreamFactory {
    pub fn new(roots: Arc<RootCertStore>) -> Self {
        Self {
            provider: Arc::new(ring::default_provider()),
            roots,
        }
    }

    /// Trusts the platform's root certificates.
    pub fn with_native_roots() -> Self {
        Self::new(NATIVE_ROOTS.clone())
    }

    fn server_name(host: &HostName) -> io::Result<ServerName<'static>> {
        match IpAddr::try_from(host) {
            Ok(ip) => Ok(ServerName::IpAddress(ip.into())),
            Err(_) => ServerName::try_from(host.to_string())
                .map_err(|e| invalid_input(format!("{} is not a valid server name: {}", host, e))),
        }
    }
}

impl Default for RustlsStreamFactory {
    fn default() -> Self {
        Self::with_native_roots()
    }
}

#[async_trait]
impl SecureStreamFactory for RustlsStreamFactory {
    type Stream = TlsTransport;

    async fn wrap(
        &self,
        raw: TcpStream,
        host: &HostName,
        port: u16,
        auto_close: bool,
    ) -> io::Result<TlsTransport> {
        let server_name = Self::server_name(host)?;
        debug!("Layering TLS for {}:{} over {:?}", host, port, raw.peer_addr());
        Ok(TlsTransport::new(
            raw,
            host.to_string(),
            server_name,
            self.provider.clone(),
            self.roots.clone(),
            auto_close,
        ))
    }

    async fn connect_direct(
        &self,
        host: &HostName,
        addr: SocketAddr,
        local: Option<SocketAddr>,
    ) -> io::Result<TlsTransport> {
        let raw = TcpStream::connect_bound(addr, local).await?;
        self.wrap(raw, host, addr.port(), true).await
    }

    fn default_cipher_suites(&self) -> Vec<String> {
        self.provider.cipher_suites.iter().map(suite_name).collect()
    }

    fn supported_cipher_suites(&self) -> Vec<String> {
        ring::ALL_CIPHER_SUITES.iter().map(suite_name).collect()
    }

    fn supported_protocols(&self) -> Vec<String> {
        supported_protocols()
    }
}

fn supported_protocols() -> Vec<String> {
    rustls::ALL_VERSIONS
        .iter()
        .filter_map(|v| protocol_name(v.version))
        .map(String::from)
        .collect()
}

enum TlsState {
    Pending(TcpStream),
    Handshaking(Box<Connect<TcpStream>>),
    Established(Box<TlsStream<TcpStream>>),
    Failed,
    /// Kept open when the transport does not own the TCP stream's lifetime.
    /// A stream still mid-handshake or after a failed handshake is owned by
    /// rustls and is always dropped on close.
    Closed(Option<TcpStream>),
}

struct TlsParams {
    cipher_suites: Option<Vec<SupportedCipherSuite>>,
    protocols: Option<Vec<&'static SupportedProtocolVersion>>,
    client_mode: bool,
    need_client_auth: bool,
    want_client_auth: bool,
    session_creation: bool,
}

impl Default for TlsParams {
    fn default() -> Self {
        Self {
            cipher_suites: None,
            protocols: None,
            client_mode: true,
            need_client_auth: false,
            want_client_auth: false,
            session_creation: true,
        }
    }
}

/// A TLS client stream whose handshake runs on first use, so TLS parameters can
/// still be changed after the TCP connection exists.
pub struct TlsTransport {
    state: TlsState,
    host: String,
    server_name: ServerName<'static>,
    provider: Arc<CryptoProvider>,
    roots: Arc<RootCertStore>,
    params: TlsParams,
    listeners: Vec<HandshakeListener>,
    read_timeout: Option<Duration>,
    read_deadline: Option<Pin<Box<Sleep>>>,
    auto_close: bool,
    input_shutdown: bool,
    output_shutdown: bool,
}

impl TlsTransport {
    fn new(
        raw: TcpStream,
        host: String,
        server_name: ServerName<'static>,
        provider: Arc<CryptoProvider>,
        roots: Arc<RootCertStore>,
        auto_close: bool,
    ) -> Self {
        Self {
            state: TlsState::Pending(raw),
            host,
            server_name,
            provider,
            roots,
            params: TlsParams::default(),
            listeners: Vec::new(),
            read_timeout: None,
            read_deadline: None,
            auto_close,
            input_shutdown: false,
            output_shutdown: false,
        }
    }

    fn tcp(&self) -> io::Result<&TcpStream> {
        let tcp = match &self.state {
            TlsState::Pending(tcp) => Some(tcp),
            TlsState::Handshaking(connect) => connect.get_ref(),
            TlsState::Established(tls) => Some(tls.get_ref().0),
            TlsState::Closed(tcp) => tcp.as_ref(),
            TlsState::Failed => None,
        };
        tcp.ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "TLS transport is closed"))
    }

    fn tls_params_mut(&mut self) -> io::Result<&mut TlsParams> {
        match self.state {
            TlsState::Pending(_) => Ok(&mut self.params),
            _ => Err(io::Error::new(
                io::ErrorKind::Other,
                "TLS parameters cannot change once the handshake has started",
            )),
        }
    }

    fn client_config(&self) -> io::Result<ClientConfig> {
        if !self.params.client_mode {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "only the client side of a TLS handshake is supported",
            ));
        }
        if !self.params.session_creation {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "session creation is disabled and there is no session to resume",
            ));
        }

        let mut provider = (*self.provider).clone();
        if let Some(suites) = &self.params.cipher_suites {
            provider.cipher_suites = suites.clone();
        }
        let versions = self.params.protocols.as_deref().unwrap_or(rustls::ALL_VERSIONS);

        let config = ClientConfig::builder_with_provider(Arc::new(provider))
            .with_protocol_versions(versions)
            .map_err(|e| invalid_input(e.to_string()))?
            .with_root_certificates(self.roots.clone())
            .with_no_client_auth();
        Ok(config)
    }

    fn session_of(&self, tls: &TlsStream<TcpStream>) -> TlsSession {
        let conn = tls.get_ref().1;
        TlsSession {
            server_name: self.host.clone(),
            protocol: conn
                .protocol_version()
                .and_then(protocol_name)
                .map(String::from),
            cipher_suite: conn.negotiated_cipher_suite().as_ref().map(suite_name),
            peer_certificates: conn
                .peer_certificates()
                .map(|certs| certs.iter().map(|cert| cert.to_vec()).collect())
                .unwrap_or_default(),
        }
    }

    fn poll_handshake(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if let TlsState::Pending(_) = self.state {
            let config = match self.client_config() {
                Ok(config) => config,
                Err(err) => {
                    self.state = TlsState::Failed;
                    return Poll::Ready(Err(err));
                }
            };
            if let TlsState::Pending(tcp) = mem::replace(&mut self.state, TlsState::Failed) {
                let connector = TlsConnector::from(Arc::new(config));
                let connect = connector.connect(self.server_name.clone(), tcp);
                self.state = TlsState::Handshaking(Box::new(connect));
            }
        }

        let result = match &mut self.state {
            TlsState::Handshaking(connect) => ready!(Pin::new(&mut **connect).poll(cx)),
            TlsState::Established(_) => return Poll::Ready(Ok(())),
            TlsState::Closed(_) => {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "TLS transport is closed",
                )))
            }
            TlsState::Pending(_) | TlsState::Failed => {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::Other,
                    "TLS handshake failed earlier",
                )))
            }
        };

        match result {
            Ok(tls) => {
                let session = self.session_of(&tls);
                debug!(
                    "TLS handshake with {} done: {:?} {:?}",
                    session.server_name, session.protocol, session.cipher_suite
                );
                self.state = TlsState::Established(Box::new(tls));
                for listener in &self.listeners {
                    listener.notify(&session);
                }
                Poll::Ready(Ok(()))
            }
            Err(err) => {
                debug!("TLS handshake with {} failed: {}", self.host, err);
                self.state = TlsState::Failed;
                Poll::Ready(Err(err))
            }
        }
    }

    fn established(&mut self) -> io::Result<&mut TlsStream<TcpStream>> {
        match &mut self.state {
            TlsState::Established(tls) => Ok(&mut **tls),
            _ => Err(io::Error::new(io::ErrorKind::NotConnected, "TLS session is not established")),
        }
    }

    fn poll_read_deadline(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let Some(timeout) = self.read_timeout else {
            return Poll::Pending;
        };
        let now = Instant::now();
        let deadline = self
            .read_deadline
            .get_or_insert_with(|| Box::pin(tokio::time::sleep(timeout)));
        // Nobody waited on a deadline that passed this long ago: the read that
        // armed it was dropped, and this poll starts a new one.
        if deadline.deadline() + STALE_DEADLINE_SLACK < now {
            deadline.as_mut().reset(now + timeout);
        }
        ready!(deadline.as_mut().poll(cx));
        self.read_deadline = None;
        Poll::Ready(Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out")))
    }
}

impl AsyncRead for TlsTransport {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        if this.input_shutdown {
            return Poll::Ready(Ok(()));
        }

        let poll = match this.poll_handshake(cx) {
            Poll::Ready(Ok(())) => match this.established() {
                Ok(tls) => Pin::new(tls).poll_read(cx, buf),
                Err(err) => Poll::Ready(Err(err)),
            },
            Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
            Poll::Pending => Poll::Pending,
        };

        if poll.is_ready() {
            this.read_deadline = None;
            return poll;
        }
        this.poll_read_deadline(cx)
    }
}

impl AsyncWrite for TlsTransport {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        if this.output_shutdown {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "output is shut down",
            )));
        }
        ready!(this.poll_handshake(cx))?;
        Pin::new(this.established()?).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.state {
            TlsState::Established(tls) => Pin::new(&mut **tls).poll_flush(cx),
            _ => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.state {
            TlsState::Established(tls) => Pin::new(&mut **tls).poll_shutdown(cx),
            TlsState::Pending(tcp) => Pin::new(tcp).poll_shutdown(cx),
            _ => Poll::Ready(Ok(())),
        }
    }
}

#[async_trait]
impl SecureStream for TlsTransport {
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.tcp()?.peer_addr()
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.tcp()?.local_addr()
    }

    fn bind(&mut self, local: SocketAddr) -> io::Result<()> {
        let actual = self.local_addr()?;
        let ip_matches = local.ip().is_unspecified() || local.ip() == actual.ip();
        let port_matches = local.port() == 0 || local.port() == actual.port();
        if ip_matches && port_matches {
            Ok(())
        } else {
            Err(invalid_input(format!(
                "connected from {}, cannot bind to {}",
                actual, local
            )))
        }
    }

    fn set_nodelay(&mut self, on: bool) -> io::Result<()> {
        self.tcp()?.set_nodelay(on)
    }

    fn nodelay(&self) -> io::Result<bool> {
        self.tcp()?.nodelay()
    }

    fn set_linger(&mut self, linger: Option<Duration>) -> io::Result<()> {
        self.tcp()?.set_so_linger(linger)
    }

    fn linger(&self) -> io::Result<Option<Duration>> {
        self.tcp()?.so_linger()
    }

    fn set_oob_inline(&mut self, on: bool) -> io::Result<()> {
        self.tcp()?.set_oob_inline(on)
    }

    fn oob_inline(&self) -> io::Result<bool> {
        self.tcp()?.oob_inline()
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.read_timeout = timeout.filter(|t| !t.is_zero());
        self.read_deadline = None;
        Ok(())
    }

    fn read_timeout(&self) -> io::Result<Option<Duration>> {
        Ok(self.read_timeout)
    }

    fn set_send_buffer_size(&mut self, size: usize) -> io::Result<()> {
        self.tcp()?.set_send_buffer_size(size)
    }

    fn send_buffer_size(&self) -> io::Result<usize> {
        self.tcp()?.send_buffer_size()
    }

    fn set_recv_buffer_size(&mut self, size: usize) -> io::Result<()> {
        self.tcp()?.set_recv_buffer_size(size)
    }

    fn recv_buffer_size(&self) -> io::Result<usize> {
        self.tcp()?.recv_buffer_size()
    }

    fn set_keepalive(&mut self, on: bool) -> io::Result<()> {
        self.tcp()?.set_keepalive(on)
    }

    fn keepalive(&self) -> io::Result<bool> {
        self.tcp()?.keepalive()
    }

    fn set_traffic_class(&mut self, class: u32) -> io::Result<()> {
        self.tcp()?.set_traffic_class(class)
    }

    fn traffic_class(&self) -> io::Result<u32> {
        self.tcp()?.traffic_class()
    }

    fn set_reuse_address(&mut self, on: bool) -> io::Result<()> {
        self.tcp()?.set_reuse_address(on)
    }

    fn reuse_address(&self) -> io::Result<bool> {
        self.tcp()?.reuse_address()
    }

    fn set_performance_preferences(&mut self, preferences: PerformancePreferences) -> io::Result<()> {
        // TCP has no such knob.
        debug!("Ignoring performance preferences {:?}", preferences);
        Ok(())
    }

    async fn send_urgent_data(&mut self, _byte: u8) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "urgent data cannot be sent over TLS",
        ))
    }

    fn supported_cipher_suites(&self) -> Vec<String> {
        ring::ALL_CIPHER_SUITES.iter().map(suite_name).collect()
    }

    fn enabled_cipher_suites(&self) -> Vec<String> {
        match &self.params.cipher_suites {
            Some(suites) => suites.iter().map(suite_name).collect(),
            None => self.provider.cipher_suites.iter().map(suite_name).collect(),
        }
    }

    fn set_enabled_cipher_suites(&mut self, suites: &[String]) -> io::Result<()> {
        let suites = suites
            .iter()
            .map(|name| {
                ring::ALL_CIPHER_SUITES
                    .iter()
                    .find(|suite| suite_name(suite) == *name)
                    .copied()
                    .ok_or_else(|| invalid_input(format!("unknown cipher suite {}", name)))
            })
            .collect::<io::Result<Vec<_>>>()?;
        self.tls_params_mut()?.cipher_suites = Some(suites);
        Ok(())
    }

    fn supported_protocols(&self) -> Vec<String> {
        supported_protocols()
    }

    fn enabled_protocols(&self) -> Vec<String> {
        let versions = self.params.protocols.as_deref().unwrap_or(rustls::ALL_VERSIONS);
        versions
            .iter()
            .filter_map(|v| protocol_name(v.version))
            .map(String::from)
            .collect()
    }

    fn set_enabled_protocols(&mut self, protocols: &[String]) -> io::Result<()> {
        let versions = protocols
            .iter()
            .map(|name| {
                rustls::ALL_VERSIONS
                    .iter()
                    .find(|v| protocol_name(v.version) == Some(name.as_str()))
                    .copied()
                    .ok_or_else(|| invalid_input(format!("unsupported protocol {}", name)))
            })
            .collect::<io::Result<Vec<_>>>()?;
        self.tls_params_mut()?.protocols = Some(versions);
        Ok(())
    }

    fn add_handshake_listener(&mut self, listener: HandshakeListener) {
        self.listeners.push(listener);
    }

    fn remove_handshake_listener(&mut self, listener: &HandshakeListener) -> bool {
        match self.listeners.iter().position(|l| l == listener) {
            Some(index) => {
                self.listeners.remove(index);
                true
            }
            None => false,
        }
    }

    fn set_use_client_mode(&mut self, on: bool) -> io::Result<()> {
        self.tls_params_mut()?.client_mode = on;
        Ok(())
    }

    fn use_client_mode(&self) -> bool {
        self.params.client_mode
    }

    fn set_need_client_auth(&mut self, on: bool) -> io::Result<()> {
        self.tls_params_mut()?.need_client_auth = on;
        Ok(())
    }

    fn need_client_auth(&self) -> bool {
        self.params.need_client_auth
    }

    fn set_want_client_auth(&mut self, on: bool) -> io::Result<()> {
        self.tls_params_mut()?.want_client_auth = on;
        Ok(())
    }

    fn want_client_auth(&self) -> bool {
        self.params.want_client_auth
    }

    fn set_enable_session_creation(&mut self, on: bool) -> io::Result<()> {
        self.tls_params_mut()?.session_creation = on;
        Ok(())
    }

    fn enable_session_creation(&self) -> bool {
        self.params.session_creation
    }

    fn shutdown_input(&mut self) -> io::Result<()> {
        self.tcp()?.shutdown_read()?;
        self.input_shutdown = true;
        Ok(())
    }

    async fn shutdown_output(&mut self) -> io::Result<()> {
        self.shutdown().await?;
        self.output_shutdown = true;
        Ok(())
    }

    fn is_input_shutdown(&self) -> bool {
        self.input_shutdown
    }

    fn is_output_shutdown(&self) -> bool {
        self.output_shutdown
    }

    async fn start_handshake(&mut self) -> io::Result<()> {
        std::future::poll_fn(|cx| self.poll_handshake(cx)).await
    }

    async fn session(&mut self) -> io::Result<TlsSession> {
        self.start_handshake().await?;
        let session = match &self.state {
            TlsState::Established(tls) => self.session_of(tls),
            _ => return Err(io::Error::new(io::ErrorKind::NotConnected, "TLS session is not established")),
        };
        Ok(session)
    }

    async fn close(&mut self) -> io::Result<()> {
        match mem::replace(&mut self.state, TlsState::Closed(None)) {
            TlsState::Established(mut tls) => {
                tls.get_mut().1.send_close_notify();
                tls.flush().await?;
                let (mut tcp, _) = (*tls).into_inner();
                if self.auto_close {
                    tcp.shutdown().await?;
                } else {
                    self.state = TlsState::Closed(Some(tcp));
                }
            }
            TlsState::Pending(mut tcp) => {
                if self.auto_close {
                    tcp.shutdown().await?;
                } else {
                    self.state = TlsState::Closed(Some(tcp));
                }
            }
            TlsState::Closed(tcp) => self.state = TlsState::Closed(tcp),
            TlsState::Handshaking(_) => {
                debug!("Closing {} mid-handshake drops its TCP stream", self.host);
            }
            TlsState::Failed => {}
        }
        self.input_shutdown = true;
        self.output_shutdown = true;
        Ok(())
    }
}
