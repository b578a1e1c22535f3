//! Gateway error types.
//!
//! One enum per layer: start-up ([`ConnectionError`]), publish/consume
//! ([`TransportError`]), per-call outcome ([`CallError`]) and the façade
//! ([`GatewayError`]).

use std::time::Duration;

use serde_json::{json, Value};
use shared_broker::BrokerError;
use thiserror::Error;

use crate::domain::config::ConfigError;

/// JSON-RPC style error codes used in error replies and by [`CallError::code`].
pub mod codes {
    // JSON-RPC 2.0 standard errors
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;

    // Server errors (-32000 to -32099)
    pub const SERVER_ERROR: i32 = -32000;
    pub const RESOURCE_UNAVAILABLE: i32 = -32002;
    pub const LIMIT_EXCEEDED: i32 = -32005;
    pub const TIMEOUT: i32 = -32006;
}

/// Build an `{"error": {"code", "message"}}` reply body.
pub fn error_body(code: i32, message: impl Into<String>) -> Value {
    json!({
        "error": {
            "code": code,
            "message": message.into(),
        }
    })
}

/// Failure to establish the transport session. Fatal at start-up.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The broker URL is malformed
    #[error("invalid broker endpoint: {0}")]
    InvalidEndpoint(String),

    /// No broker answered at the endpoint
    #[error("broker unreachable: {0}")]
    Refused(String),

    /// Credentials were rejected
    #[error("access refused for user '{0}'")]
    AccessRefused(String),

    /// The virtual host does not exist
    #[error("unknown virtual host '{0}'")]
    UnknownVhost(String),

    /// Channel or reply queue could not be set up
    #[error("session setup failed: {0}")]
    Setup(BrokerError),
}

impl From<BrokerError> for ConnectionError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::InvalidEndpoint(reason) => Self::InvalidEndpoint(reason),
            BrokerError::ConnectionRefused(reason) => Self::Refused(reason),
            BrokerError::AccessRefused(user) => Self::AccessRefused(user),
            BrokerError::UnknownVhost(vhost) => Self::UnknownVhost(vhost),
            other => Self::Setup(other),
        }
    }
}

/// Failure to publish or consume on the session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The session was closed locally
    #[error("transport session is closed")]
    SessionClosed,

    /// The broker rejected the operation or the connection broke
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}

impl From<TransportError> for ConnectionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Broker(inner) => Self::Setup(inner),
            TransportError::SessionClosed => Self::Setup(BrokerError::ConnectionClosed),
        }
    }
}

/// Outcome of a failed `call`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CallError {
    /// No reply arrived before the deadline
    #[error("no reply from '{destination}' within {timeout:?}")]
    Timeout {
        destination: String,
        timeout: Duration,
    },

    /// The request could not be published
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The reply reports a business failure
    #[error("remote error: {message}")]
    Remote {
        code: Option<i64>,
        message: String,
        body: Value,
    },

    /// Too many calls in flight
    #[error("too many pending calls (limit {limit})")]
    Overloaded { limit: usize },

    /// The request or the typed reply could not be (de)serialized
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl CallError {
    /// JSON-RPC style code for this error.
    ///
    /// Remote errors keep their own code when it fits in an `i32`.
    pub fn code(&self) -> i32 {
        match self {
            Self::Timeout { .. } => codes::TIMEOUT,
            Self::Transport(_) => codes::RESOURCE_UNAVAILABLE,
            Self::Remote { code, .. } => code
                .and_then(|c| i32::try_from(c).ok())
                .unwrap_or(codes::SERVER_ERROR),
            Self::Overloaded { .. } => codes::LIMIT_EXCEEDED,
            Self::Serialization(_) => codes::INVALID_REQUEST,
        }
    }

    /// True for [`CallError::Timeout`]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Render as an error reply body.
    pub fn to_error_body(&self) -> Value {
        error_body(self.code(), self.to_string())
    }
}

/// Failure to bring up the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The transport session could not be opened
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),
}
