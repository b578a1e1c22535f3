//! # RPC Gateway - correlated request/reply over a message broker
//!
//! Lets a web tier call back-end services (`bank`, `directory`, ...) as if
//! they were functions: `call(destination, message, timeout)` publishes the
//! message to the destination queue and resolves with the reply that carries
//! the same correlation ID, or with a timeout.
//!
//! # Architecture
//!
//! ```text
//!  callers ──► RpcClient::call ──────────────┐
//!                 │ 1. register + arm timer  │ 2. publish(correlation_id, reply_to)
//!                 ▼                          ▼
//!         ┌──────────────────┐     ┌───────────────────┐        ┌──────────┐
//!         │ PendingCallTable │     │ TransportSession  │ ─────► │  queue   │
//!         │ id → completion  │     │ 1 conn, 1 channel │        │  "bank"  │
//!         └──────────────────┘     └───────────────────┘        └────┬─────┘
//!                 ▲  3. complete(id, body)                           │
//!                 │     or expire(id) on deadline                    ▼
//!         ┌───────┴──────────┐     ┌───────────────────┐        ┌──────────┐
//!         │  ReplyListener   │ ◄── │ private reply     │ ◄───── │ RpcServer│
//!         │  (one task)      │     │ queue amq.gen-…   │        │ (remote) │
//!         └──────────────────┘     └───────────────────┘        └──────────┘
//! ```
//!
//! Every call resolves exactly once: the entry is removed atomically by
//! either the reply listener or the call's deadline timer, and only the
//! remover resolves it.
//!
//! # Usage
//!
//! ```ignore
//! use rpc_gateway::{GatewayConfig, RpcGateway};
//! use shared_broker::InMemoryBroker;
//!
//! let broker = InMemoryBroker::new("localhost");
//! let gateway = RpcGateway::connect(&GatewayConfig::default(), &broker)?;
//! let balance = gateway
//!     .client()
//!     .call("bank", &serde_json::json!({"account": "A-1"}), Duration::from_secs(5))
//!     .await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod adapters;
pub mod domain;
pub mod ipc;
pub mod ports;
pub mod service;

// Re-export main types
pub use adapters::{SessionState, TransportSession, JSON_CONTENT_TYPE};
pub use domain::{
    codes, error_body, interpret_reply, CallError, ConfigError, ConnectionError, CorrelationId,
    GatewayConfig, GatewayError, PendingCallTable, PendingStatsSnapshot, TransportError,
    DEFAULT_CALL_TIMEOUT,
};
pub use ipc::{
    handler_fn, ListenerStatsSnapshot, ReplyListener, RequestContext, RequestHandler, RpcClient,
    RpcServer,
};
pub use ports::{OutboundRequest, ReplySource, RequestPublisher};
pub use service::RpcGateway;
