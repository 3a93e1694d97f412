//! The secure-stream seam: how a TLS transport is made from a TCP stream, and
//! what a deferred socket asks of the transport once it has one.

mod tls;

pub use tls::{RustlsStreamFactory, TlsTransport};

use crate::utils::HostName;

use std::{
    fmt::{self, Debug, Formatter},
    io,
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

/// Builds secure streams, either over an already connected (possibly tunnelled)
/// TCP stream or by dialling the target itself.
#[async_trait]
pub trait SecureStreamFactory: Send + Sync {
    type Stream: SecureStream + 'static;

    /// Layers TLS for `host:port` over `raw`. With `auto_close`, closing the
    /// secure stream also closes `raw`.
    async fn wrap(
        &self,
        raw: TcpStream,
        host: &HostName,
        port: u16,
        auto_close: bool,
    ) -> io::Result<Self::Stream>;

    async fn connect_direct(
        &self,
        host: &HostName,
        addr: SocketAddr,
        local: Option<SocketAddr>,
    ) -> io::Result<Self::Stream>;

    fn default_cipher_suites(&self) -> Vec<String>;
    fn supported_cipher_suites(&self) -> Vec<String>;
    fn supported_protocols(&self) -> Vec<String>;
}

/// A connected secure stream with the socket and TLS knobs a deferred socket forwards.
#[async_trait]
pub trait SecureStream: AsyncRead + AsyncWrite + Unpin + Send {
    fn peer_addr(&self) -> io::Result<SocketAddr>;
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// The stream is connected already, so this only checks that it sits on `local`.
    fn bind(&mut self, local: SocketAddr) -> io::Result<()>;

    fn set_nodelay(&mut self, on: bool) -> io::Result<()>;
    fn nodelay(&self) -> io::Result<bool>;

    fn set_linger(&mut self, linger: Option<Duration>) -> io::Result<()>;
    fn linger(&self) -> io::Result<Option<Duration>>;

    fn set_oob_inline(&mut self, on: bool) -> io::Result<()>;
    fn oob_inline(&self) -> io::Result<bool>;

    /// `None` waits forever.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
    fn read_timeout(&self) -> io::Result<Option<Duration>>;

    fn set_send_buffer_size(&mut self, size: usize) -> io::Result<()>;
    fn send_buffer_size(&self) -> io::Result<usize>;

    fn set_recv_buffer_size(&mut self, size: usize) -> io::Result<()>;
    fn recv_buffer_size(&self) -> io::Result<usize>;

    fn set_keepalive(&mut self, on: bool) -> io::Result<()>;
    fn keepalive(&self) -> io::Result<bool>;

    fn set_traffic_class(&mut self, class: u32) -> io::Result<()>;
    fn traffic_class(&self) -> io::Result<u32>;

    fn set_reuse_address(&mut self, on: bool) -> io::Result<()>;
    fn reuse_address(&self) -> io::Result<bool>;

    fn set_performance_preferences(&mut self, preferences: PerformancePreferences) -> io::Result<()>;

    async fn send_urgent_data(&mut self, byte: u8) -> io::Result<()>;

    fn supported_cipher_suites(&self) -> Vec<String>;
    fn enabled_cipher_suites(&self) -> Vec<String>;
    fn set_enabled_cipher_suites(&mut self, suites: &[String]) -> io::Result<()>;

    fn supported_protocols(&self) -> Vec<String>;
    fn enabled_protocols(&self) -> Vec<String>;
    fn set_enabled_protocols(&mut self, protocols: &[String]) -> io::Result<()>;

    fn add_handshake_listener(&mut self, listener: HandshakeListener);
    /// Removes the first registration of `listener`. Returns whether one was found.
    fn remove_handshake_listener(&mut self, listener: &HandshakeListener) -> bool;

    fn set_use_client_mode(&mut self, on: bool) -> io::Result<()>;
    fn use_client_mode(&self) -> bool;

    fn set_need_client_auth(&mut self, on: bool) -> io::Result<()>;
    fn need_client_auth(&self) -> bool;

    fn set_want_client_auth(&mut self, on: bool) -> io::Result<()>;
    fn want_client_auth(&self) -> bool;

    fn set_enable_session_creation(&mut self, on: bool) -> io::Result<()>;
    fn enable_session_creation(&self) -> bool;

    fn shutdown_input(&mut self) -> io::Result<()>;
    async fn shutdown_output(&mut self) -> io::Result<()>;
    fn is_input_shutdown(&self) -> bool;
    fn is_output_shutdown(&self) -> bool;

    async fn start_handshake(&mut self) -> io::Result<()>;
    /// Details of the established session, handshaking first if needed.
    async fn session(&mut self) -> io::Result<TlsSession>;

    /// Ends the session. Without auto-close the underlying TCP stream stays open,
    /// unless the handshake was in flight.
    async fn close(&mut self) -> io::Result<()>;
}

/// What a completed handshake negotiated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsSession {
    pub server_name: String,
    pub protocol: Option<String>,
    pub cipher_suite: Option<String>,
    /// DER, leaf first.
    pub peer_certificates: Vec<Vec<u8>>,
}

/// Callback run once a handshake completes. Listeners are compared by identity,
/// so a clone removes the registration it was cloned from.
#[derive(Clone)]
pub struct HandshakeListener(Arc<dyn Fn(&TlsSession) + Send + Sync>);

impl HandshakeListener {
    pub fn new(f: impl Fn(&TlsSession) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn notify(&self, session: &TlsSession) {
        (self.0)(session)
    }
}

impl PartialEq for HandshakeListener {
    fn eq(&self, other: &Self) -> bool {
        Arc::as_ptr(&self.0) as *const () == Arc::as_ptr(&other.0) as *const ()
    }
}

impl Eq for HandshakeListener {}

impl Debug for HandshakeListener {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "HandshakeListener({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}

/// Relative importance of short connection time, low latency and high bandwidth.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PerformancePreferences {
    pub connection_time: i32,
    pub latency: i32,
    pub bandwidth: i32,
}
