use crate::{
    layer::{HandshakeListener, PerformancePreferences, SecureStream},
    Error,
};

use std::{io, net::SocketAddr, time::Duration};

use log::debug;

/// Options set on a socket before it has a transport. `None` means "never set";
/// only the last value set is kept.
#[derive(Debug, Default)]
pub(crate) struct DeferredOptions {
    pub bind: Option<SocketAddr>,
    pub nodelay: Option<bool>,
    pub linger: Option<Option<Duration>>,
    pub oob_inline: Option<bool>,
    pub read_timeout: Option<Option<Duration>>,
    pub send_buffer_size: Option<usize>,
    pub recv_buffer_size: Option<usize>,
    pub keepalive: Option<bool>,
    pub traffic_class: Option<u32>,
    pub reuse_address: Option<bool>,
    pub performance_preferences: Option<PerformancePreferences>,
    pub enabled_cipher_suites: Option<Vec<String>>,
    pub enabled_protocols: Option<Vec<String>>,
    pub handshake_listeners: Vec<HandshakeListener>,
    pub client_mode: Option<bool>,
    pub need_client_auth: Option<bool>,
    pub want_client_auth: Option<bool>,
    pub session_creation: Option<bool>,
}

fn apply<T>(
    option: &'static str,
    value: Option<T>,
    set: impl FnOnce(T) -> io::Result<()>,
) -> Result<(), Error> {
    let Some(value) = value else {
        return Ok(());
    };
    debug!("Replaying deferred option {}", option);
    set(value).map_err(|source| Error::OptionReplayFailed { option, source })
}

impl DeferredOptions {
    /// Applies every set option to `stream`, in declaration order.
    pub fn replay<S>(self, stream: &mut S) -> Result<(), Error>
    where
        S: SecureStream + ?Sized,
    {
        apply("bind", self.bind, |v| stream.bind(v))?;
        apply("tcp_nodelay", self.nodelay, |v| stream.set_nodelay(v))?;
        apply("so_linger", self.linger, |v| stream.set_linger(v))?;
        apply("oob_inline", self.oob_inline, |v| stream.set_oob_inline(v))?;
        apply("read_timeout", self.read_timeout, |v| stream.set_read_timeout(v))?;
        apply("send_buffer_size", self.send_buffer_size, |v| {
            stream.set_send_buffer_size(v)
        })?;
        apply("recv_buffer_size", self.recv_buffer_size, |v| {
            stream.set_recv_buffer_size(v)
        })?;
        apply("keep_alive", self.keepalive, |v| stream.set_keepalive(v))?;
        apply("traffic_class", self.traffic_class, |v| stream.set_traffic_class(v))?;
        apply("reuse_address", self.reuse_address, |v| stream.set_reuse_address(v))?;
        apply("performance_preferences", self.performance_preferences, |v| {
            stream.set_performance_preferences(v)
        })?;
        apply("enabled_cipher_suites", self.enabled_cipher_suites, |v| {
            stream.set_enabled_cipher_suites(&v)
        })?;
        apply("enabled_protocols", self.enabled_protocols, |v| {
            stream.set_enabled_protocols(&v)
        })?;
        for listener in self.handshake_listeners {
            stream.add_handshake_listener(listener);
        }
        apply("use_client_mode", self.client_mode, |v| stream.set_use_client_mode(v))?;
        apply("need_client_auth", self.need_client_auth, |v| {
            stream.set_need_client_auth(v)
        })?;
        apply("want_client_auth", self.want_client_auth, |v| {
            stream.set_want_client_auth(v)
        })?;
        apply("enable_session_creation", self.session_creation, |v| {
            stream.set_enable_session_creation(v)
        })?;
        Ok(())
    }
}
