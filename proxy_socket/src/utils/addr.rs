use crate::BoxError;

use std::{
    fmt::{Display, Write},
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    str::FromStr,
};

/// A connection target: host name or IP literal plus port.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SocketAddr {
    pub hostname: HostName,
    pub port: u16,
}

impl SocketAddr {
    pub fn new(hostname: HostName, port: u16) -> Self {
        Self { hostname, port }
    }

    /// Splits `host[:port]` (IPv6 literals in brackets) into its parts.
    pub fn parse_host_header(host: &str) -> Result<(HostName, Option<u16>), BoxError> {
        if let Ok(ip) = IpAddr::from_str(host) {
            return Ok((ip.into(), None));
        }

        let hostname;
        let mut port = None;
        if let Some(rest) = host.strip_prefix('[') {
            let (v6, tail) = rest.split_once(']').ok_or("unterminated IPv6 literal")?;
            hostname = v6;
            if !tail.is_empty() {
                port = Some(tail.strip_prefix(':').ok_or("malformed port")?.parse()?);
            }
        } else if let Some((host, port_)) = host.rsplit_once(':') {
            hostname = host;
            port = Some(port_.parse()?);
        } else {
            hostname = host;
        }

        let hostname = HostName::from_str(hostname)?;
        Ok((hostname, port))
    }

    /// Resolves to every network address of the target, in resolver order.
    pub async fn resolve_all(&self) -> Result<Vec<std::net::SocketAddr>, BoxError> {
        if let Ok(ip) = IpAddr::try_from(&self.hostname) {
            return Ok(vec![std::net::SocketAddr::new(ip, self.port)]);
        }

        let addrs: Vec<_> = tokio::net::lookup_host((self.hostname.to_string(), self.port))
            .await?
            .collect();
        if addrs.is_empty() {
            return Err(format!("{} did not resolve to any address", self.hostname).into());
        }
        Ok(addrs)
    }

    /// Resolves to the first network address of the target.
    pub async fn resolve(&self) -> Result<std::net::SocketAddr, BoxError> {
        let addrs = self.resolve_all().await?;
        addrs
            .into_iter()
            .next()
            .ok_or_else(|| format!("{} did not resolve to any address", self.hostname).into())
    }
}

impl Display for SocketAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.hostname.to_string_url_style())?;
        f.write_char(':')?;
        f.write_str(&self.port.to_string())
    }
}

impl FromStr for SocketAddr {
    type Err = BoxError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(addr) = std::net::SocketAddr::from_str(s) {
            return Ok(addr.into());
        }

        match Self::parse_host_header(s)? {
            (hostname, Some(port)) => Ok(Self { hostname, port }),
            (_, None) => Err(format!("{} has no port", s).into()),
        }
    }
}

impl From<std::net::SocketAddr> for SocketAddr {
    fn from(value: std::net::SocketAddr) -> Self {
        Self {
            hostname: value.ip().into(),
            port: value.port(),
        }
    }
}

impl TryFrom<&SocketAddr> for std::net::SocketAddr {
    type Error = BoxError;
    fn try_from(value: &SocketAddr) -> Result<Self, Self::Error> {
        Ok(Self::new((&value.hostname).try_into()?, value.port))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum HostName {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
    Domain(String),
}

impl HostName {
    pub fn is_ipaddr(&self) -> bool {
        !matches!(self, Self::Domain(_))
    }

    pub fn to_string_url_style(&self) -> String {
        match self {
            Self::V6(v6) => format!("[{}]", v6),
            _ => self.to_string(),
        }
    }
}

impl Display for HostName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V4(v4) => f.write_str(&v4.to_string()),
            Self::V6(v6) => f.write_str(&v6.to_string()),
            Self::Domain(domain) => f.write_str(domain),
        }
    }
}

impl FromStr for HostName {
    type Err = BoxError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(ip) = IpAddr::from_str(s) {
            Ok(ip.into())
        } else {
            Ok(Self::Domain(idna::domain_to_ascii_strict(s)?))
        }
    }
}

impl From<IpAddr> for HostName {
    fn from(value: IpAddr) -> Self {
        match value {
            IpAddr::V4(v4) => v4.into(),
            IpAddr::V6(v6) => v6.into(),
        }
    }
}

impl From<Ipv4Addr> for HostName {
    fn from(value: Ipv4Addr) -> Self {
        Self::V4(value)
    }
}

impl From<Ipv6Addr> for HostName {
    fn from(value: Ipv6Addr) -> Self {
        match value.to_ipv4_mapped() {
            Some(v4) => Self::V4(v4),
            None => Self::V6(value),
        }
    }
}

impl TryFrom<&HostName> for IpAddr {
    type Error = BoxError;
    fn try_from(value: &HostName) -> Result<Self, Self::Error> {
        match value {
            HostName::V4(v4) => Ok(Self::V4(*v4)),
            HostName::V6(v6) => Ok(Self::V6(*v6)),
            HostName::Domain(domain) => Err(format!("{} is not an IP address", domain).into()),
        }
    }
}
