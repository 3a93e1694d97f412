//! Fakes shared by the unit tests.

use crate::{
    layer::{HandshakeListener, PerformancePreferences, SecureStream, SecureStreamFactory, TlsSession},
    utils::HostName,
};

use std::{
    io,
    net::SocketAddr,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf},
    net::{TcpListener, TcpStream},
};
use tokio_rustls::{
    rustls::{
        crypto::ring,
        pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer},
        RootCertStore, ServerConfig,
    },
    TlsAcceptor,
};

pub type CallLog = Arc<Mutex<Vec<String>>>;

/// A stream that records every call made on it. Setter calls whose name equals
/// `fail_on` fail with `PermissionDenied`.
pub struct RecordingStream {
    io: Option<TcpStream>,
    log: CallLog,
    fail_on: Option<&'static str>,
    listeners: Vec<HandshakeListener>,
    input_shutdown: bool,
    output_shutdown: bool,
}

impl RecordingStream {
    fn record(&self, call: &'static str, value: impl std::fmt::Debug) -> io::Result<()> {
        self.log.lock().unwrap().push(format!("{}({:?})", call, value));
        if self.fail_on == Some(call) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, call));
        }
        Ok(())
    }
}

impl AsyncRead for RecordingStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.io {
            Some(io) => Pin::new(io).poll_read(cx, buf),
            None => Poll::Ready(Ok(())),
        }
    }
}

impl AsyncWrite for RecordingStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.io {
            Some(io) => Pin::new(io).poll_write(cx, buf),
            None => Poll::Ready(Ok(buf.len())),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.io {
            Some(io) => Pin::new(io).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.io {
            Some(io) => Pin::new(io).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

#[async_trait]
impl SecureStream for RecordingStream {
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        match &self.io {
            Some(io) => io.peer_addr(),
            None => Ok(SocketAddr::from(([127, 0, 0, 1], 9))),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        match &self.io {
            Some(io) => io.local_addr(),
            None => Ok(SocketAddr::from(([127, 0, 0, 1], 50000))),
        }
    }

    fn bind(&mut self, local: SocketAddr) -> io::Result<()> {
        self.record("bind", local)
    }

    fn set_nodelay(&mut self, on: bool) -> io::Result<()> {
        self.record("set_nodelay", on)
    }

    fn nodelay(&self) -> io::Result<bool> {
        Ok(true)
    }

    fn set_linger(&mut self, linger: Option<Duration>) -> io::Result<()> {
        self.record("set_linger", linger)
    }

    fn linger(&self) -> io::Result<Option<Duration>> {
        Ok(None)
    }

    fn set_oob_inline(&mut self, on: bool) -> io::Result<()> {
        self.record("set_oob_inline", on)
    }

    fn oob_inline(&self) -> io::Result<bool> {
        Ok(false)
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.record("set_read_timeout", timeout)
    }

    fn read_timeout(&self) -> io::Result<Option<Duration>> {
        Ok(None)
    }

    fn set_send_buffer_size(&mut self, size: usize) -> io::Result<()> {
        self.record("set_send_buffer_size", size)
    }

    fn send_buffer_size(&self) -> io::Result<usize> {
        Ok(8192)
    }

    fn set_recv_buffer_size(&mut self, size: usize) -> io::Result<()> {
        self.record("set_recv_buffer_size", size)
    }

    fn recv_buffer_size(&self) -> io::Result<usize> {
        Ok(8192)
    }

    fn set_keepalive(&mut self, on: bool) -> io::Result<()> {
        self.record("set_keepalive", on)
    }

    fn keepalive(&self) -> io::Result<bool> {
        Ok(false)
    }

    fn set_traffic_class(&mut self, class: u32) -> io::Result<()> {
        self.record("set_traffic_class", class)
    }

    fn traffic_class(&self) -> io::Result<u32> {
        Ok(0)
    }

    fn set_reuse_address(&mut self, on: bool) -> io::Result<()> {
        self.record("set_reuse_address", on)
    }

    fn reuse_address(&self) -> io::Result<bool> {
        Ok(false)
    }

    fn set_performance_preferences(&mut self, preferences: PerformancePreferences) -> io::Result<()> {
        self.record(
            "set_performance_preferences",
            (preferences.connection_time, preferences.latency, preferences.bandwidth),
        )
    }

    async fn send_urgent_data(&mut self, byte: u8) -> io::Result<()> {
        self.record("send_urgent_data", byte)
    }

    fn supported_cipher_suites(&self) -> Vec<String> {
        vec!["LIVE_SUITE".into()]
    }

    fn enabled_cipher_suites(&self) -> Vec<String> {
        vec!["LIVE_SUITE".into()]
    }

    fn set_enabled_cipher_suites(&mut self, suites: &[String]) -> io::Result<()> {
        self.record("set_enabled_cipher_suites", suites)
    }

    fn supported_protocols(&self) -> Vec<String> {
        vec!["TLSv1.3".into()]
    }

    fn enabled_protocols(&self) -> Vec<String> {
        vec!["TLSv1.3".into()]
    }

    fn set_enabled_protocols(&mut self, protocols: &[String]) -> io::Result<()> {
        self.record("set_enabled_protocols", protocols)
    }

    fn add_handshake_listener(&mut self, listener: HandshakeListener) {
        self.log.lock().unwrap().push("add_handshake_listener".into());
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
        self.record("set_use_client_mode", on)
    }

    fn use_client_mode(&self) -> bool {
        true
    }

    fn set_need_client_auth(&mut self, on: bool) -> io::Result<()> {
        self.record("set_need_client_auth", on)
    }

    fn need_client_auth(&self) -> bool {
        false
    }

    fn set_want_client_auth(&mut self, on: bool) -> io::Result<()> {
        self.record("set_want_client_auth", on)
    }

    fn want_client_auth(&self) -> bool {
        false
    }

    fn set_enable_session_creation(&mut self, on: bool) -> io::Result<()> {
        self.record("set_enable_session_creation", on)
    }

    fn enable_session_creation(&self) -> bool {
        true
    }

    fn shutdown_input(&mut self) -> io::Result<()> {
        self.input_shutdown = true;
        self.record("shutdown_input", ())
    }

    async fn shutdown_output(&mut self) -> io::Result<()> {
        self.output_shutdown = true;
        self.record("shutdown_output", ())
    }

    fn is_input_shutdown(&self) -> bool {
        self.input_shutdown
    }

    fn is_output_shutdown(&self) -> bool {
        self.output_shutdown
    }

    async fn start_handshake(&mut self) -> io::Result<()> {
        self.record("start_handshake", ())?;
        let session = TlsSession {
            server_name: "fake".into(),
            ..Default::default()
        };
        for listener in &self.listeners {
            listener.notify(&session);
        }
        Ok(())
    }

    async fn session(&mut self) -> io::Result<TlsSession> {
        self.start_handshake().await?;
        Ok(TlsSession {
            server_name: "fake".into(),
            ..Default::default()
        })
    }

    async fn close(&mut self) -> io::Result<()> {
        self.io = None;
        self.record("close", ())
    }
}

/// Hands out [`RecordingStream`]s and counts how each was made.
#[derive(Default)]
pub struct RecordingFactory {
    pub log: CallLog,
    pub fail_on: Option<&'static str>,
    pub fail_direct: bool,
    pub wraps: AtomicUsize,
    pub directs: AtomicUsize,
}

impl RecordingFactory {
    pub fn failing_on(call: &'static str) -> Self {
        Self {
            fail_on: Some(call),
            ..Default::default()
        }
    }

    pub fn without_direct() -> Self {
        Self {
            fail_direct: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn stream(&self, io: Option<TcpStream>) -> RecordingStream {
        RecordingStream {
            io,
            log: self.log.clone(),
            fail_on: self.fail_on,
            listeners: Vec::new(),
            input_shutdown: false,
            output_shutdown: false,
        }
    }
}

#[async_trait]
impl SecureStreamFactory for RecordingFactory {
    type Stream = RecordingStream;

    async fn wrap(
        &self,
        raw: TcpStream,
        _host: &HostName,
        _port: u16,
        _auto_close: bool,
    ) -> io::Result<RecordingStream> {
        self.wraps.fetch_add(1, Ordering::SeqCst);
        Ok(self.stream(Some(raw)))
    }

    async fn connect_direct(
        &self,
        _host: &HostName,
        addr: SocketAddr,
        _local: Option<SocketAddr>,
    ) -> io::Result<RecordingStream> {
        self.directs.fetch_add(1, Ordering::SeqCst);
        if self.fail_direct {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("direct connection to {} refused", addr),
            ));
        }
        Ok(self.stream(None))
    }

    fn default_cipher_suites(&self) -> Vec<String> {
        vec!["FACTORY_SUITE".into()]
    }

    fn supported_cipher_suites(&self) -> Vec<String> {
        vec!["FACTORY_SUITE".into(), "OTHER_SUITE".into()]
    }

    fn supported_protocols(&self) -> Vec<String> {
        vec!["TLSv1.2".into(), "TLSv1.3".into()]
    }
}

/// An HTTP proxy on localhost that answers every `CONNECT` with `status` and
/// counts the requests it saw. A forwarding proxy also relays the tunnel to the
/// requested target.
pub struct FakeHttpProxy {
    pub addr: SocketAddr,
    pub hits: Arc<AtomicUsize>,
}

impl FakeHttpProxy {
    pub async fn start(status: &'static str) -> Self {
        Self::spawn(status, false).await
    }

    pub async fn forwarding() -> Self {
        Self::spawn("200 Connection established", true).await
    }

    async fn spawn(status: &'static str, forward: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            while let Ok((mut client, _)) = listener.accept().await {
                let counter = counter.clone();
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut byte = [0; 1];
                    while !request.ends_with(b"\r\n\r\n") {
                        if client.read_exact(&mut byte).await.is_err() {
                            return;
                        }
                        request.push(byte[0]);
                    }
                    counter.fetch_add(1, Ordering::SeqCst);

                    let mut upstream = None;
                    if forward {
                        let request = String::from_utf8_lossy(&request);
                        let Some(target) = request.split_whitespace().nth(1) else {
                            return;
                        };
                        match TcpStream::connect(target).await {
                            Ok(stream) => upstream = Some(stream),
                            Err(_) => return,
                        }
                    }

                    let response = format!("HTTP/1.1 {}\r\n\r\n", status);
                    if client.write_all(response.as_bytes()).await.is_err() {
                        return;
                    }
                    match upstream {
                        Some(mut upstream) => {
                            let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
                        }
                        None => {
                            let _ = tokio::io::copy(&mut client, &mut tokio::io::sink()).await;
                        }
                    }
                });
            }
        });

        Self { addr, hits }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// A TLS server on 127.0.0.1 with a self-signed certificate for that address.
/// It answers `ping` with `pong`.
pub struct TlsServer {
    pub addr: SocketAddr,
    pub roots: Arc<RootCertStore>,
}

impl TlsServer {
    pub async fn start() -> Self {
        let cert = rcgen::generate_simple_self_signed(vec!["127.0.0.1".to_string()]).unwrap();
        let cert_der = CertificateDer::from(cert.cert.der().to_vec());
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der()));

        let mut roots = RootCertStore::empty();
        roots.add(cert_der.clone()).unwrap();

        let config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key)
            .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    let Ok(mut tls) = acceptor.accept(tcp).await else {
                        return;
                    };
                    let mut ping = [0; 4];
                    if tls.read_exact(&mut ping).await.is_ok() && &ping == b"ping" {
                        let _ = tls.write_all(b"pong").await;
                        let _ = tls.flush().await;
                    }
                });
            }
        });

        Self {
            addr,
            roots: Arc::new(roots),
        }
    }
}

/// A proxy that accepts connections and never answers.
pub async fn stalled_proxy() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((client, _)) = listener.accept().await {
            held.push(client);
        }
    });
    addr
}

/// A local address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}
