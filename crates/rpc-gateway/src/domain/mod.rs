//! Domain types for the RPC gateway.
//!
//! Correlation IDs, the pending call table, reply interpretation,
//! configuration and errors. Nothing here touches the broker directly.

pub mod config;
pub mod correlation;
pub mod error;
pub mod pending;
pub mod reply;

// Re-exports for convenience
pub use config::{
    BrokerConfig, ConfigError, GatewayConfig, LimitsConfig, ReplyConfig, TimeoutConfig,
    DEFAULT_CALL_TIMEOUT,
};
pub use correlation::CorrelationId;
pub use error::{codes, error_body, CallError, ConnectionError, GatewayError, TransportError};
pub use pending::{
    CallOutcome, PendingCall, PendingCallInfo, PendingCallTable, PendingStats,
    PendingStatsSnapshot,
};
pub use reply::{interpret_reply, is_failure};
