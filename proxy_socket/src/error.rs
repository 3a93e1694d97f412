use crate::BoxError;

use std::io;

use thiserror::Error;

/// Errors surfaced by deferred sockets and the proxy-aware factory.
#[derive(Debug, Error)]
pub enum Error {
    /// `connect` was called on a socket that already has a transport.
    #[error("socket is already connected")]
    AlreadyConnected,

    /// A data-path operation was attempted before `connect` succeeded.
    #[error("socket is not connected")]
    NotConnected,

    /// The socket was closed, or its connect attempt failed.
    #[error("socket is closed")]
    Closed,

    /// One proxy candidate could not carry the connection. Logged and skipped.
    #[error("connecting to {target} via {proxy} failed: {source}")]
    ProxyConnectFailed {
        proxy: String,
        target: String,
        #[source]
        source: BoxError,
    },

    /// Every proxy candidate and the direct fallback failed.
    #[error("every proxy candidate and the direct connection to {target} failed: {source}")]
    AllCandidatesFailed {
        target: String,
        #[source]
        source: BoxError,
    },

    /// A buffered option could not be applied to the new transport.
    #[error("applying deferred option {option} failed: {source}")]
    OptionReplayFailed {
        option: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::Io(inner) => inner.kind(),
            Error::AlreadyConnected => io::ErrorKind::AlreadyExists,
            Error::NotConnected | Error::Closed => io::ErrorKind::NotConnected,
            Error::ProxyConnectFailed { .. } | Error::AllCandidatesFailed { .. } => {
                io::ErrorKind::ConnectionRefused
            }
            Error::OptionReplayFailed { source, .. } => source.kind(),
            Error::InvalidAddress(_) | Error::Config(_) => io::ErrorKind::InvalidInput,
        };

        match err {
            Error::Io(inner) => inner,
            other => io::Error::new(kind, other),
        }
    }
}
