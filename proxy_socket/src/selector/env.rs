use super::{NoProxy, Proxy, ProxySelector};

use std::{collections::HashMap, str::FromStr};

use hyper::Uri;
use log::warn;

/// Proxy settings of the process environment: `http_proxy`, `https_proxy`,
/// `all_proxy` and `no_proxy`, lowercase names taking precedence.
///
/// The environment is read once, when the selector is built.
#[derive(Clone, Debug, Default)]
pub struct EnvProxySelector {
    http: Option<Proxy>,
    https: Option<Proxy>,
    all: Option<Proxy>,
    no_proxy: NoProxy,
}

impl EnvProxySelector {
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let lookup = |name: &str| {
            vars.get(name)
                .or_else(|| vars.get(&name.to_ascii_uppercase()))
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
        };
        let proxy = |name: &str| {
            let value = lookup(name)?;
            match Proxy::from_str(value) {
                Ok(proxy) => Some(proxy),
                Err(err) => {
                    warn!("Ignoring {}={}: {}", name, value, err);
                    None
                }
            }
        };

        Self {
            http: proxy("http_proxy"),
            https: proxy("https_proxy"),
            all: proxy("all_proxy"),
            no_proxy: lookup("no_proxy").map(NoProxy::parse).unwrap_or_default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.http.is_none() && self.https.is_none() && self.all.is_none()
    }
}

impl ProxySelector for EnvProxySelector {
    fn select(&self, uri: &Uri) -> Vec<Proxy> {
        if let Some(host) = uri.host() {
            if self.no_proxy.matches(host) {
                return vec![Proxy::direct()];
            }
        }

        let proxy = match uri.scheme_str() {
            Some("http") => self.http.as_ref().or(self.all.as_ref()),
            Some("https") => self.https.as_ref().or(self.all.as_ref()),
            _ => self.all.as_ref(),
        };

        match proxy {
            Some(proxy) => vec![proxy.clone()],
            None => vec![Proxy::direct()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        selector::{resolve_candidates, ProxyKind, SocksVersion},
        utils::SocketAddr,
    };

    fn uri(s: &str) -> Uri {
        Uri::from_str(s).unwrap()
    }

    #[test]
    fn lowercase_wins_over_uppercase() {
        let selector = EnvProxySelector::from_vars([
            ("HTTP_PROXY", "http://upper.corp:3128"),
            ("http_proxy", "http://lower.corp:3128"),
        ]);
        let proxies = selector.select(&uri("http://broker.example:8883/"));
        assert_eq!(proxies[0].to_string(), "http://lower.corp:3128");
    }

    #[test]
    fn scheme_specific_then_all_proxy() {
        let selector = EnvProxySelector::from_vars([
            ("https_proxy", "http://tls.corp:3128"),
            ("ALL_PROXY", "socks5://socks.corp"),
        ]);

        let https = selector.select(&uri("https://broker.example:8883/"));
        assert_eq!(https[0].to_string(), "http://tls.corp:3128");

        let http = selector.select(&uri("http://broker.example:8883/"));
        assert_eq!(http[0].kind, ProxyKind::Socks(SocksVersion::V5));
    }

    #[test]
    fn no_proxy_and_unset_mean_direct() {
        let selector = EnvProxySelector::from_vars([
            ("https_proxy", "http://tls.corp:3128"),
            ("no_proxy", ".example"),
        ]);
        assert_eq!(
            selector.select(&uri("https://broker.example:8883/")),
            vec![Proxy::direct()]
        );
        assert_eq!(
            selector.select(&uri("http://broker.other:8883/")),
            vec![Proxy::direct()]
        );
    }

    #[test]
    fn unparseable_values_are_ignored() {
        let selector = EnvProxySelector::from_vars([("http_proxy", "ftp://proxy.corp:21")]);
        assert!(selector.is_empty());
    }

    #[test]
    fn feeds_candidate_resolution() {
        let selector = EnvProxySelector::from_vars([
            ("http_proxy", "http://proxy.corp:3128"),
            ("https_proxy", "http://proxy.corp:3128"),
        ]);
        let target = SocketAddr::from_str("broker.example:8883").unwrap();
        let candidates = resolve_candidates(Some(&selector as &dyn ProxySelector), &target);
        assert_eq!(candidates.len(), 1);
    }
}
