//! # proxy_socket
//! TLS client sockets that reach their target through HTTP or SOCKS proxies when
//! the proxy configuration says so, and directly otherwise. Options set on a
//! socket before it connects are buffered and applied once the transport exists.

pub mod client;
pub mod config;
mod error;
pub mod factory;
pub mod layer;
pub mod outbound;
pub mod selector;
pub mod socket;
pub mod utils;

#[cfg(test)]
mod testing;

pub use client::{ClientConnection, ConnectionType, Endpoint};
pub use config::Config;
pub use error::Error;
pub use factory::ProxyAwareTlsFactory;
pub use layer::{RustlsStreamFactory, SecureStream, SecureStreamFactory};
pub use selector::{EnvProxySelector, Proxy, ProxySelector, StaticProxySelector};
pub use socket::DeferredTlsSocket;

pub type BoxError = Box<dyn std::error::Error + Sync + Send>;
