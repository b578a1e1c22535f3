//! # Broker Errors

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by broker operations.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerError {
    /// The endpoint string could not be parsed.
    #[error("invalid broker endpoint: {0}")]
    InvalidEndpoint(String),

    /// No broker is reachable at the endpoint, or the broker is shut down.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// Credentials were rejected.
    #[error("access refused for user '{0}'")]
    AccessRefused(String),

    /// The endpoint names a virtual host the broker does not serve.
    #[error("unknown virtual host '{0}'")]
    UnknownVhost(String),

    /// The connection was closed (locally or by a broker shutdown).
    #[error("connection closed")]
    ConnectionClosed,

    /// The channel was closed.
    #[error("channel closed")]
    ChannelClosed,

    /// The queue does not exist.
    #[error("queue '{0}' not found")]
    QueueNotFound(String),

    /// The queue is exclusive to another connection.
    #[error("queue '{0}' is locked by another connection")]
    ResourceLocked(String),

    /// The queue reached its capacity and rejected the publish.
    #[error("queue '{0}' is full")]
    QueueFull(String),

    /// A remote peer sent something the attach protocol does not allow, or
    /// the socket failed mid-frame.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl BrokerError {
    /// Whether this error means the connection or channel is unusable.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed | Self::ChannelClosed)
    }
}
