use crate::{
    utils::{HostName, SocketAddr},
    BoxError,
};

use std::str::FromStr;

use hyper::Uri;
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};

/// An absolute `scheme://[user[:password]@]host[:port][/path][?query]` URI,
/// with credentials percent-decoded.
#[derive(Clone, Debug)]
pub struct ParsedUri {
    pub scheme: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub hostname: HostName,
    pub port: Option<u16>,
    pub path: String,
    pub query: Option<String>,
}

impl ParsedUri {
    /// `scheme://host:port/`, the form proxy selectors are queried with.
    pub fn for_target(scheme: &str, target: &SocketAddr) -> Self {
        Self {
            scheme: scheme.to_string(),
            user: None,
            password: None,
            hostname: target.hostname.clone(),
            port: Some(target.port),
            path: "/".to_string(),
            query: None,
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Host and port, falling back to `default_port` when the URI has none.
    pub fn socket_addr(&self, default_port: u16) -> SocketAddr {
        SocketAddr::new(self.hostname.clone(), self.port.unwrap_or(default_port))
    }
}

impl TryFrom<&Uri> for ParsedUri {
    type Error = BoxError;

    fn try_from(value: &Uri) -> Result<Self, Self::Error> {
        let scheme = value.scheme_str().ok_or("URI has no scheme")?;
        let authority = value.authority().ok_or("URI has no authority")?;

        let mut user = None;
        let mut password = None;
        let host;
        if let Some((auth, host_)) = authority.as_str().rsplit_once('@') {
            host = host_;
            if let Some((user_, password_)) = auth.split_once(':') {
                user = Some(percent_decode_str(user_).decode_utf8()?.to_string());
                password = Some(percent_decode_str(password_).decode_utf8()?.to_string());
            } else {
                user = Some(percent_decode_str(auth).decode_utf8()?.to_string());
            }
        } else {
            host = authority.as_str();
        }

        let (hostname, port) = SocketAddr::parse_host_header(host)?;

        let mut path = value.path();
        if path.is_empty() {
            path = "/";
        }

        Ok(ParsedUri {
            scheme: scheme.to_ascii_lowercase(),
            user,
            password,
            hostname,
            port,
            path: path.to_string(),
            query: value.query().filter(|q| !q.is_empty()).map(|q| q.to_string()),
        })
    }
}

impl FromStr for ParsedUri {
    type Err = BoxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uri = Uri::from_str(s)?;
        Self::try_from(&uri)
    }
}

impl TryFrom<ParsedUri> for Uri {
    type Error = BoxError;

    fn try_from(value: ParsedUri) -> Result<Self, Self::Error> {
        let mut authority = String::new();
        if let Some(user) = value.user {
            authority = utf8_percent_encode(&user, NON_ALPHANUMERIC).to_string();
            if let Some(password) = value.password {
                authority.push(':');
                authority.push_str(&utf8_percent_encode(&password, NON_ALPHANUMERIC).to_string());
            }
            authority.push('@');
        }
        authority.push_str(&value.hostname.to_string_url_style());
        if let Some(port) = value.port {
            authority.push(':');
            authority.push_str(&port.to_string());
        }

        let mut path_and_query = value.path;
        if let Some(query) = value.query {
            path_and_query.push('?');
            path_and_query.push_str(&query);
        }

        Ok(Uri::builder()
            .scheme(value.scheme.as_str())
            .authority(authority)
            .path_and_query(path_and_query)
            .build()?)
    }
}
