//! A TLS socket that can be configured before it knows how it will connect.

mod options;

use options::DeferredOptions;

use crate::{
    layer::{HandshakeListener, PerformancePreferences, SecureStream, SecureStreamFactory, TlsSession},
    outbound::{connect_through, ProxyOutBound, Raw},
    selector::{resolve_candidates, Proxy, ProxySelector},
    utils::SocketAddr,
    BoxError, Error,
};

use std::{
    future::Future,
    io, mem,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use log::debug;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

enum SocketState<S> {
    Unconnected(Box<DeferredOptions>),
    Connected(S),
    /// `None` when the connect attempt failed and there never was a transport.
    Closed(Option<S>),
}

/// A secure socket whose transport is chosen at `connect` time: through the first
/// proxy candidate that works, or directly. Options set before that are buffered
/// and applied to the transport once it exists.
pub struct DeferredTlsSocket<F: SecureStreamFactory> {
    factory: Arc<F>,
    selector: Option<Arc<dyn ProxySelector>>,
    state: SocketState<F::Stream>,
}

async fn with_timeout<T>(
    timeout: Option<Duration>,
    attempt: impl Future<Output = Result<T, BoxError>>,
) -> Result<T, BoxError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, attempt).await?,
        None => attempt.await,
    }
}

impl<F: SecureStreamFactory> DeferredTlsSocket<F> {
    pub fn new(factory: Arc<F>, selector: Option<Arc<dyn ProxySelector>>) -> Self {
        Self {
            factory,
            selector,
            state: SocketState::Unconnected(Box::default()),
        }
    }

    /// Connects to `target`, trying each proxy candidate in turn and then a direct
    /// connection. `timeout` bounds every single attempt, not the whole call.
    ///
    /// A socket connects at most once. A failed connect is final: the socket is
    /// closed afterwards, and any further `connect` is `AlreadyConnected`.
    pub async fn connect(&mut self, target: &SocketAddr, timeout: Option<Duration>) -> Result<(), Error> {
        let options = match mem::replace(&mut self.state, SocketState::Closed(None)) {
            SocketState::Unconnected(options) => options,
            state => {
                self.state = state;
                return Err(Error::AlreadyConnected);
            }
        };

        let mut stream = self.establish(target, options.bind, timeout).await?;
        if let Err(err) = (*options).replay(&mut stream) {
            debug!("Closing connection to {}: {}", target, err);
            if let Err(close_err) = stream.close().await {
                debug!("Closing connection to {} failed: {}", target, close_err);
            }
            return Err(err);
        }

        self.state = SocketState::Connected(stream);
        Ok(())
    }

    async fn establish(
        &self,
        target: &SocketAddr,
        bind: Option<std::net::SocketAddr>,
        timeout: Option<Duration>,
    ) -> Result<F::Stream, Error> {
        for proxy in resolve_candidates(self.selector.as_deref(), target) {
            debug!("Connecting to {} via {}", target, proxy);
            match with_timeout(timeout, self.through_proxy(&proxy, target, bind)).await {
                Ok(stream) => {
                    debug!("Connected to {} via {}", target, proxy);
                    return Ok(stream);
                }
                Err(source) => {
                    let err = Error::ProxyConnectFailed {
                        proxy: proxy.to_string(),
                        target: target.to_string(),
                        source,
                    };
                    debug!("{}", err);
                }
            }
        }

        debug!("Connecting to {} directly", target);
        with_timeout(timeout, self.direct(target, bind))
            .await
            .map_err(|source| Error::AllCandidatesFailed {
                target: target.to_string(),
                source,
            })
    }

    async fn through_proxy(
        &self,
        proxy: &Proxy,
        target: &SocketAddr,
        bind: Option<std::net::SocketAddr>,
    ) -> Result<F::Stream, BoxError> {
        let outbound = proxy.outbound()?;
        let raw = Raw::new(bind);
        let stack: [&dyn ProxyOutBound; 2] = [&raw, &*outbound];
        let tunnel = connect_through(&stack, target).await?;
        Ok(self
            .factory
            .wrap(tunnel, &target.hostname, target.port, true)
            .await?)
    }

    async fn direct(
        &self,
        target: &SocketAddr,
        bind: Option<std::net::SocketAddr>,
    ) -> Result<F::Stream, BoxError> {
        let addr = target.resolve().await?;
        Ok(self
            .factory
            .connect_direct(&target.hostname, addr, bind)
            .await?)
    }

    fn configure<T>(
        &mut self,
        value: T,
        defer: impl FnOnce(&mut DeferredOptions, T),
        apply: impl FnOnce(&mut F::Stream, T) -> io::Result<()>,
    ) -> Result<(), Error> {
        match &mut self.state {
            SocketState::Unconnected(pending) => {
                defer(&mut **pending, value);
                Ok(())
            }
            SocketState::Connected(stream) | SocketState::Closed(Some(stream)) => {
                Ok(apply(stream, value)?)
            }
            SocketState::Closed(None) => Err(Error::Closed),
        }
    }

    fn inspect<T>(
        &self,
        pending: impl FnOnce(&DeferredOptions) -> T,
        live: impl FnOnce(&F::Stream) -> io::Result<T>,
    ) -> Result<T, Error> {
        match &self.state {
            SocketState::Unconnected(options) => Ok(pending(&**options)),
            SocketState::Connected(stream) | SocketState::Closed(Some(stream)) => Ok(live(stream)?),
            SocketState::Closed(None) => Err(Error::Closed),
        }
    }

    fn connected(&mut self) -> Result<&mut F::Stream, Error> {
        match &mut self.state {
            SocketState::Connected(stream) => Ok(stream),
            SocketState::Unconnected(_) => Err(Error::NotConnected),
            SocketState::Closed(_) => Err(Error::Closed),
        }
    }

    fn stream(&self) -> Option<&F::Stream> {
        match &self.state {
            SocketState::Connected(stream) | SocketState::Closed(Some(stream)) => Some(stream),
            _ => None,
        }
    }

    /// Local address to connect from. Takes effect when the transport is dialled.
    pub fn bind(&mut self, local: std::net::SocketAddr) -> Result<(), Error> {
        self.configure(local, |o, v| o.bind = Some(v), |s, v| s.bind(v))
    }

    pub fn set_nodelay(&mut self, on: bool) -> Result<(), Error> {
        self.configure(on, |o, v| o.nodelay = Some(v), |s, v| s.set_nodelay(v))
    }

    pub fn nodelay(&self) -> Result<bool, Error> {
        self.inspect(|o| o.nodelay.unwrap_or(false), |s| s.nodelay())
    }

    /// `None` turns lingering off.
    pub fn set_linger(&mut self, linger: Option<Duration>) -> Result<(), Error> {
        self.configure(linger, |o, v| o.linger = Some(v), |s, v| s.set_linger(v))
    }

    pub fn linger(&self) -> Result<Option<Duration>, Error> {
        self.inspect(|o| o.linger.flatten(), |s| s.linger())
    }

    pub fn set_oob_inline(&mut self, on: bool) -> Result<(), Error> {
        self.configure(on, |o, v| o.oob_inline = Some(v), |s, v| s.set_oob_inline(v))
    }

    pub fn oob_inline(&self) -> Result<bool, Error> {
        self.inspect(|o| o.oob_inline.unwrap_or(false), |s| s.oob_inline())
    }

    /// `None` or a zero duration waits forever.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), Error> {
        let timeout = timeout.filter(|t| !t.is_zero());
        self.configure(
            timeout,
            |o, v| o.read_timeout = Some(v),
            |s, v| s.set_read_timeout(v),
        )
    }

    pub fn read_timeout(&self) -> Result<Option<Duration>, Error> {
        self.inspect(|o| o.read_timeout.flatten(), |s| s.read_timeout())
    }

    pub fn set_send_buffer_size(&mut self, size: usize) -> Result<(), Error> {
        self.configure(
            size,
            |o, v| o.send_buffer_size = Some(v),
            |s, v| s.set_send_buffer_size(v),
        )
    }

    pub fn send_buffer_size(&self) -> Result<Option<usize>, Error> {
        self.inspect(|o| o.send_buffer_size, |s| s.send_buffer_size().map(Some))
    }

    pub fn set_recv_buffer_size(&mut self, size: usize) -> Result<(), Error> {
        self.configure(
            size,
            |o, v| o.recv_buffer_size = Some(v),
            |s, v| s.set_recv_buffer_size(v),
        )
    }

    pub fn recv_buffer_size(&self) -> Result<Option<usize>, Error> {
        self.inspect(|o| o.recv_buffer_size, |s| s.recv_buffer_size().map(Some))
    }

    pub fn set_keepalive(&mut self, on: bool) -> Result<(), Error> {
        self.configure(on, |o, v| o.keepalive = Some(v), |s, v| s.set_keepalive(v))
    }

    pub fn keepalive(&self) -> Result<bool, Error> {
        self.inspect(|o| o.keepalive.unwrap_or(false), |s| s.keepalive())
    }

    pub fn set_traffic_class(&mut self, class: u32) -> Result<(), Error> {
        self.configure(
            class,
            |o, v| o.traffic_class = Some(v),
            |s, v| s.set_traffic_class(v),
        )
    }

    pub fn traffic_class(&self) -> Result<Option<u32>, Error> {
        self.inspect(|o| o.traffic_class, |s| s.traffic_class().map(Some))
    }

    pub fn set_reuse_address(&mut self, on: bool) -> Result<(), Error> {
        self.configure(
            on,
            |o, v| o.reuse_address = Some(v),
            |s, v| s.set_reuse_address(v),
        )
    }

    pub fn reuse_address(&self) -> Result<bool, Error> {
        self.inspect(|o| o.reuse_address.unwrap_or(false), |s| s.reuse_address())
    }

    pub fn set_performance_preferences(&mut self, preferences: PerformancePreferences) -> Result<(), Error> {
        self.configure(
            preferences,
            |o, v| o.performance_preferences = Some(v),
            |s, v| s.set_performance_preferences(v),
        )
    }

    pub fn supported_cipher_suites(&self) -> Vec<String> {
        match self.stream() {
            Some(stream) => stream.supported_cipher_suites(),
            None => self.factory.supported_cipher_suites(),
        }
    }

    pub fn enabled_cipher_suites(&self) -> Result<Vec<String>, Error> {
        self.inspect(
            |o| o.enabled_cipher_suites.clone().unwrap_or_default(),
            |s| Ok(s.enabled_cipher_suites()),
        )
    }

    pub fn set_enabled_cipher_suites(&mut self, suites: Vec<String>) -> Result<(), Error> {
        self.configure(
            suites,
            |o, v| o.enabled_cipher_suites = Some(v),
            |s, v| s.set_enabled_cipher_suites(&v),
        )
    }

    pub fn supported_protocols(&self) -> Vec<String> {
        match self.stream() {
            Some(stream) => stream.supported_protocols(),
            None => self.factory.supported_protocols(),
        }
    }

    pub fn enabled_protocols(&self) -> Result<Vec<String>, Error> {
        self.inspect(
            |o| o.enabled_protocols.clone().unwrap_or_default(),
            |s| Ok(s.enabled_protocols()),
        )
    }

    pub fn set_enabled_protocols(&mut self, protocols: Vec<String>) -> Result<(), Error> {
        self.configure(
            protocols,
            |o, v| o.enabled_protocols = Some(v),
            |s, v| s.set_enabled_protocols(&v),
        )
    }

    pub fn add_handshake_listener(&mut self, listener: HandshakeListener) -> Result<(), Error> {
        self.configure(
            listener,
            |o, v| o.handshake_listeners.push(v),
            |s, v| {
                s.add_handshake_listener(v);
                Ok(())
            },
        )
    }

    /// Removes the first registration of `listener`, returning whether there was one.
    pub fn remove_handshake_listener(&mut self, listener: &HandshakeListener) -> Result<bool, Error> {
        match &mut self.state {
            SocketState::Unconnected(options) => {
                let listeners = &mut options.handshake_listeners;
                match listeners.iter().position(|l| l == listener) {
                    Some(index) => {
                        listeners.remove(index);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            SocketState::Connected(stream) | SocketState::Closed(Some(stream)) => {
                Ok(stream.remove_handshake_listener(listener))
            }
            SocketState::Closed(None) => Err(Error::Closed),
        }
    }

    pub fn set_use_client_mode(&mut self, on: bool) -> Result<(), Error> {
        self.configure(
            on,
            |o, v| o.client_mode = Some(v),
            |s, v| s.set_use_client_mode(v),
        )
    }

    pub fn use_client_mode(&self) -> Result<bool, Error> {
        self.inspect(|o| o.client_mode.unwrap_or(false), |s| Ok(s.use_client_mode()))
    }

    pub fn set_need_client_auth(&mut self, on: bool) -> Result<(), Error> {
        self.configure(
            on,
            |o, v| o.need_client_auth = Some(v),
            |s, v| s.set_need_client_auth(v),
        )
    }

    pub fn need_client_auth(&self) -> Result<bool, Error> {
        self.inspect(|o| o.need_client_auth.unwrap_or(false), |s| Ok(s.need_client_auth()))
    }

    pub fn set_want_client_auth(&mut self, on: bool) -> Result<(), Error> {
        self.configure(
            on,
            |o, v| o.want_client_auth = Some(v),
            |s, v| s.set_want_client_auth(v),
        )
    }

    pub fn want_client_auth(&self) -> Result<bool, Error> {
        self.inspect(|o| o.want_client_auth.unwrap_or(false), |s| Ok(s.want_client_auth()))
    }

    pub fn set_enable_session_creation(&mut self, on: bool) -> Result<(), Error> {
        self.configure(
            on,
            |o, v| o.session_creation = Some(v),
            |s, v| s.set_enable_session_creation(v),
        )
    }

    pub fn enable_session_creation(&self) -> Result<bool, Error> {
        self.inspect(
            |o| o.session_creation.unwrap_or(false),
            |s| Ok(s.enable_session_creation()),
        )
    }

    pub async fn send_urgent_data(&mut self, byte: u8) -> Result<(), Error> {
        Ok(self.connected()?.send_urgent_data(byte).await?)
    }

    pub async fn start_handshake(&mut self) -> Result<(), Error> {
        Ok(self.connected()?.start_handshake().await?)
    }

    pub async fn session(&mut self) -> Result<TlsSession, Error> {
        Ok(self.connected()?.session().await?)
    }

    pub fn shutdown_input(&mut self) -> Result<(), Error> {
        Ok(self.connected()?.shutdown_input()?)
    }

    pub async fn shutdown_output(&mut self) -> Result<(), Error> {
        Ok(self.connected()?.shutdown_output().await?)
    }

    /// Closes the transport. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<(), Error> {
        match mem::replace(&mut self.state, SocketState::Closed(None)) {
            SocketState::Connected(mut stream) => {
                let result = stream.close().await;
                self.state = SocketState::Closed(Some(stream));
                Ok(result?)
            }
            SocketState::Closed(Some(stream)) => {
                self.state = SocketState::Closed(Some(stream));
                Ok(())
            }
            SocketState::Closed(None) => Err(Error::Closed),
            state @ SocketState::Unconnected(_) => {
                self.state = state;
                Err(Error::NotConnected)
            }
        }
    }

    pub fn peer_addr(&self) -> Option<std::net::SocketAddr> {
        self.stream()?.peer_addr().ok()
    }

    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.stream()?.local_addr().ok()
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, SocketState::Connected(_))
    }

    pub fn is_bound(&self) -> bool {
        match &self.state {
            SocketState::Unconnected(options) => options.bind.is_some(),
            SocketState::Connected(_) | SocketState::Closed(Some(_)) => true,
            SocketState::Closed(None) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, SocketState::Closed(_))
    }

    pub fn is_input_shutdown(&self) -> bool {
        self.stream().is_some_and(|s| s.is_input_shutdown())
    }

    pub fn is_output_shutdown(&self) -> bool {
        self.stream().is_some_and(|s| s.is_output_shutdown())
    }
}

impl<F: SecureStreamFactory> AsyncRead for DeferredTlsSocket<F> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.connected() {
            Ok(stream) => Pin::new(stream).poll_read(cx, buf),
            Err(err) => Poll::Ready(Err(err.into())),
        }
    }
}

impl<F: SecureStreamFactory> AsyncWrite for DeferredTlsSocket<F> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.connected() {
            Ok(stream) => Pin::new(stream).poll_write(cx, buf),
            Err(err) => Poll::Ready(Err(err.into())),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.connected() {
            Ok(stream) => Pin::new(stream).poll_flush(cx),
            Err(err) => Poll::Ready(Err(err.into())),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.connected() {
            Ok(stream) => Pin::new(stream).poll_shutdown(cx),
            Err(err) => Poll::Ready(Err(err.into())),
        }
    }
}
