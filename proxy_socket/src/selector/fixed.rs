use super::{NoProxy, Proxy, ProxySelector};
use crate::{config::Config, Error};

use std::str::FromStr;

use hyper::Uri;

/// A fixed proxy list, the same for every target that is not bypassed.
#[derive(Clone, Debug, Default)]
pub struct StaticProxySelector {
    proxies: Vec<Proxy>,
    no_proxy: NoProxy,
}

impl StaticProxySelector {
    pub fn new(proxies: Vec<Proxy>, no_proxy: NoProxy) -> Self {
        Self { proxies, no_proxy }
    }

    pub fn proxies(&self) -> &[Proxy] {
        &self.proxies
    }
}

impl TryFrom<&Config> for StaticProxySelector {
    type Error = Error;

    fn try_from(config: &Config) -> Result<Self, Self::Error> {
        let mut proxies = Vec::new();
        for proxy in config.proxies.iter().flatten() {
            let server = format!("{}://{}", proxy.protocol.to_ascii_lowercase(), proxy.server);
            let mut parsed = Proxy::from_str(&server)
                .map_err(|e| Error::Config(format!("proxy {}: {}", server, e)))?;
            if let Some(user) = &proxy.user {
                parsed = parsed.with_auth(user.clone(), proxy.password.clone());
            }
            proxies.push(parsed);
        }

        let no_proxy = NoProxy::new(config.no_proxy.iter().flatten());
        Ok(Self::new(proxies, no_proxy))
    }
}

impl ProxySelector for StaticProxySelector {
    fn select(&self, uri: &Uri) -> Vec<Proxy> {
        match uri.host() {
            Some(host) if self.no_proxy.matches(host) => vec![Proxy::direct()],
            _ => self.proxies.clone(),
        }
    }
}
