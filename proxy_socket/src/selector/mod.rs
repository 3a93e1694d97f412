//! Proxy discovery: which proxies may carry a connection to a given target.

mod env;
mod fixed;
mod no_proxy;

pub use env::EnvProxySelector;
pub use fixed::StaticProxySelector;
pub use no_proxy::NoProxy;

use crate::{
    outbound::{HttpProxy, ProxyOutBound, Socks4Proxy, Socks5Proxy},
    utils::{ParsedUri, SocketAddr},
    BoxError,
};

use std::{
    fmt::{self, Display, Formatter},
    hash::{Hash, Hasher},
    str::FromStr,
};

use hyper::Uri;
use log::debug;

/// URI schemes a target is looked up under, since proxy settings are often per scheme.
const PROXY_SCHEMES: [&str; 2] = ["http", "https"];

/// Answers which proxies apply to a URI, most preferred first.
///
/// An empty answer, or one holding only [`Proxy::direct`], means "no proxy".
pub trait ProxySelector: Send + Sync {
    fn select(&self, uri: &Uri) -> Vec<Proxy>;
}

impl<F> ProxySelector for F
where
    F: Fn(&Uri) -> Vec<Proxy> + Send + Sync,
{
    fn select(&self, uri: &Uri) -> Vec<Proxy> {
        self(uri)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SocksVersion {
    V4,
    V5,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ProxyKind {
    Direct,
    Http,
    Socks(SocksVersion),
}

impl ProxyKind {
    /// Whether a connection can be tunnelled through this kind of proxy.
    pub fn is_tunnel(self) -> bool {
        matches!(self, ProxyKind::Http | ProxyKind::Socks(_))
    }

    pub const fn scheme(self) -> &'static str {
        match self {
            ProxyKind::Direct => "direct",
            ProxyKind::Http => "http",
            ProxyKind::Socks(SocksVersion::V4) => "socks4",
            ProxyKind::Socks(SocksVersion::V5) => "socks5",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProxyAuth {
    pub user: String,
    pub password: Option<String>,
}

/// A proxy candidate. Two proxies are the same candidate when kind and address match;
/// credentials do not take part in the comparison.
#[derive(Clone, Debug)]
pub struct Proxy {
    pub kind: ProxyKind,
    pub addr: Option<SocketAddr>,
    pub auth: Option<ProxyAuth>,
}

impl Proxy {
    pub fn direct() -> Self {
        Self {
            kind: ProxyKind::Direct,
            addr: None,
            auth: None,
        }
    }

    pub fn http(addr: SocketAddr) -> Self {
        Self {
            kind: ProxyKind::Http,
            addr: Some(addr),
            auth: None,
        }
    }

    pub fn socks(version: SocksVersion, addr: SocketAddr) -> Self {
        Self {
            kind: ProxyKind::Socks(version),
            addr: Some(addr),
            auth: None,
        }
    }

    pub fn with_auth(mut self, user: impl Into<String>, password: Option<String>) -> Self {
        self.auth = Some(ProxyAuth {
            user: user.into(),
            password,
        });
        self
    }

    /// The hop that tunnels through this proxy.
    pub fn outbound(&self) -> Result<Box<dyn ProxyOutBound>, BoxError> {
        let addr = self
            .addr
            .clone()
            .ok_or("a direct connection has no proxy hop")?;
        let auth = self.auth.as_ref();

        Ok(match self.kind {
            ProxyKind::Http => Box::new(HttpProxy::new(addr, auth)),
            ProxyKind::Socks(SocksVersion::V4) => Box::new(Socks4Proxy::new(addr, auth)?),
            ProxyKind::Socks(SocksVersion::V5) => Box::new(Socks5Proxy::new(addr, auth)?),
            ProxyKind::Direct => return Err("a direct connection has no proxy hop".into()),
        })
    }
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.addr == other.addr
    }
}

impl Eq for Proxy {}

impl Hash for Proxy {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.addr.hash(state);
    }
}

impl Display for Proxy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.addr {
            Some(addr) => write!(f, "{}://{}", self.kind.scheme(), addr),
            None => f.write_str(self.kind.scheme()),
        }
    }
}

/// Parses `scheme://[user[:password]@]host[:port]` or a bare `host:port` (HTTP).
impl FromStr for Proxy {
    type Err = BoxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("direct") {
            return Ok(Proxy::direct());
        }

        let uri = if s.contains("://") {
            ParsedUri::from_str(s)?
        } else {
            ParsedUri::from_str(&format!("http://{}", s))?
        };

        let (kind, default_port) = match uri.scheme() {
            "http" => (ProxyKind::Http, 80),
            "socks4" | "socks4a" => (ProxyKind::Socks(SocksVersion::V4), 1080),
            "socks" | "socks5" | "socks5h" => (ProxyKind::Socks(SocksVersion::V5), 1080),
            other => return Err(format!("unsupported proxy scheme: {}", other).into()),
        };

        let mut proxy = Proxy {
            kind,
            addr: Some(uri.socket_addr(default_port)),
            auth: None,
        };
        if let Some(user) = uri.user {
            proxy = proxy.with_auth(user, uri.password);
        }
        Ok(proxy)
    }
}

/// Proxies worth attempting for `target`, in first-seen order, without duplicates.
///
/// The selector is asked once per entry of the scheme list; anything that is not an
/// HTTP or SOCKS proxy is dropped, so "no proxy" answers yield an empty list.
pub fn resolve_candidates(selector: Option<&dyn ProxySelector>, target: &SocketAddr) -> Vec<Proxy> {
    let Some(selector) = selector else {
        return Vec::new();
    };

    let mut candidates: Vec<Proxy> = Vec::new();
    for scheme in PROXY_SCHEMES {
        let uri: Uri = match ParsedUri::for_target(scheme, target).try_into() {
            Ok(uri) => uri,
            Err(err) => {
                debug!("Could not build a {} URI for {}: {}", scheme, target, err);
                continue;
            }
        };

        for proxy in selector.select(&uri) {
            if !candidates.contains(&proxy) {
                candidates.push(proxy);
            }
        }
    }

    candidates.retain(|proxy| proxy.kind.is_tunnel());
    candidates
}
