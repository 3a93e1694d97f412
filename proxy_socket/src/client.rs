//! Routing of a messaging client's endpoint: which endpoints get the proxy-aware
//! factory, and which connection type the client should assume.

use crate::{
    factory::ProxyAwareTlsFactory,
    layer::SecureStreamFactory,
    socket::DeferredTlsSocket,
    utils::{HostName, ParsedUri},
    BoxError, Error,
};

use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use log::debug;

/// Where a client connects to: a bare vendor hostname, or a full `scheme://` URI.
#[derive(Clone, Debug)]
pub enum Endpoint {
    Hostname(HostName),
    Uri(ParsedUri),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionType {
    MqttOverTls,
    MqttOverWebsocket,
}

impl Endpoint {
    /// Connection type to use for URI endpoints; `None` leaves the vendor default.
    pub fn connection_type(&self) -> Option<ConnectionType> {
        match self {
            Endpoint::Hostname(_) => None,
            Endpoint::Uri(uri) if uri.scheme() == "wss" => Some(ConnectionType::MqttOverTls),
            Endpoint::Uri(_) => Some(ConnectionType::MqttOverWebsocket),
        }
    }

    pub fn is_proxy_routed(&self) -> bool {
        matches!(self, Endpoint::Uri(_))
    }

    pub fn host(&self) -> &HostName {
        match self {
            Endpoint::Hostname(host) => host,
            Endpoint::Uri(uri) => &uri.hostname,
        }
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            Endpoint::Hostname(_) => None,
            Endpoint::Uri(uri) => uri.port.or_else(|| default_port(uri.scheme())),
        }
    }
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "wss" | "https" => Some(443),
        "mqtts" | "ssl" => Some(8883),
        "ws" | "http" => Some(80),
        "tcp" | "mqtt" => Some(1883),
        _ => None,
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |e: BoxError| Error::InvalidAddress(format!("{}: {}", s, e));
        if s.contains("://") {
            Ok(Endpoint::Uri(ParsedUri::from_str(s).map_err(invalid)?))
        } else {
            Ok(Endpoint::Hostname(HostName::from_str(s).map_err(invalid)?))
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Hostname(host) => write!(f, "{}", host),
            Endpoint::Uri(uri) => match uri.port {
                Some(port) => write!(f, "{}://{}:{}{}", uri.scheme, uri.hostname.to_string_url_style(), port, uri.path),
                None => write!(f, "{}://{}{}", uri.scheme, uri.hostname.to_string_url_style(), uri.path),
            },
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

/// The connection settings a client is built with. URI endpoints carry the
/// proxy-aware factory; bare hostnames keep the vendor's own connection path.
pub struct ClientConnection<F: SecureStreamFactory> {
    endpoint: Endpoint,
    client_id: String,
    credentials: Option<Credentials>,
    factory: Option<ProxyAwareTlsFactory<F>>,
}

pub struct ClientConnectionBuilder<F: SecureStreamFactory> {
    endpoint: String,
    client_id: String,
    credentials: Option<Credentials>,
    factory: Option<ProxyAwareTlsFactory<F>>,
}

impl<F: SecureStreamFactory> ClientConnection<F> {
    pub fn builder(endpoint: impl Into<String>) -> ClientConnectionBuilder<F> {
        ClientConnectionBuilder {
            endpoint: endpoint.into(),
            client_id: String::new(),
            credentials: None,
            factory: None,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn connection_type(&self) -> Option<ConnectionType> {
        self.endpoint.connection_type()
    }

    /// The installed socket factory, `None` on the vendor default path.
    pub fn socket_factory(&self) -> Option<&ProxyAwareTlsFactory<F>> {
        self.factory.as_ref()
    }

    /// Opens the transport for a URI endpoint. Vendor-default endpoints are opened
    /// by the vendor client itself, so they yield `None`.
    pub async fn open(&self) -> Result<Option<DeferredTlsSocket<F>>, Error> {
        let (Endpoint::Uri(uri), Some(factory)) = (&self.endpoint, &self.factory) else {
            return Ok(None);
        };
        let port = self
            .endpoint
            .port()
            .ok_or_else(|| Error::InvalidAddress(format!("{} has no port", self.endpoint)))?;

        debug!("Opening {} for client {}", self.endpoint, self.client_id);
        let socket = factory
            .create_secure_socket(&uri.hostname.to_string(), port)
            .await?;
        Ok(Some(socket))
    }
}

impl<F: SecureStreamFactory> ClientConnectionBuilder<F> {
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn socket_factory(mut self, factory: ProxyAwareTlsFactory<F>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn build(self) -> Result<ClientConnection<F>, Error> {
        let endpoint = Endpoint::from_str(&self.endpoint)?;
        let factory = match &endpoint {
            Endpoint::Uri(_) => Some(self.factory.ok_or_else(|| {
                Error::Config(format!("{} needs a socket factory", endpoint))
            })?),
            Endpoint::Hostname(_) => {
                debug!("{} uses the vendor default connection", endpoint);
                None
            }
        };

        Ok(ClientConnection {
            endpoint,
            client_id: self.client_id,
            credentials: self.credentials,
            factory,
        })
    }
}
