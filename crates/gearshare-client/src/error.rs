//! Error types.

use gearshare_core::ConnectionState;
use std::time::Duration;

/// Failure reported by a transport binding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("no access token available")]
    MissingToken,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection closed")]
    Closed,
    #[error("not connected (state: {0})")]
    NotConnected(ConnectionState),
    /// The hub ran the operation and reported an error.
    #[error("hub error: {0}")]
    Remote(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Whether this failure came from the link rather than the hub.
    pub fn is_connectivity(&self) -> bool {
        !matches!(self, Self::Remote(_) | Self::Protocol(_))
    }
}

/// Failure of a chat operation, as seen by callers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChatError {
    #[error("no auth token available")]
    AuthTokenMissing,
    #[error("failed to connect to chat hub: {0}")]
    ConnectFailed(#[source] TransportError),
    /// Connectivity could not be restored within the command's retry budget.
    #[error("not connected to chat hub, {command} was not delivered")]
    NotConnected { command: String },
    /// The hub rejected the operation.
    #[error("{method} failed: {source}")]
    InvokeFailed {
        method: &'static str,
        #[source]
        source: TransportError,
    },
}

impl ChatError {
    /// `true` for "temporarily offline" failures, `false` for "not delivered".
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotConnected { .. } | Self::ConnectFailed(_))
    }

    pub(crate) fn from_connect(err: TransportError) -> Self {
        match err {
            TransportError::MissingToken => Self::AuthTokenMissing,
            other => Self::ConnectFailed(other),
        }
    }
}

/// Configuration could not be loaded or is invalid.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid hub url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("hub url must use http, https, ws or wss, got: {0}")]
    UnsupportedScheme(String),
}
