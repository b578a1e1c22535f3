//! # Shared Broker - In-Process Message Broker
//!
//! Provides the subset of AMQP 0-9-1 semantics the request/reply convention
//! relies on, without leaving the process.
//!
//! ## Model
//!
//! ```text
//! ┌──────────────┐  basic_publish(routing_key = queue)   ┌──────────────┐
//! │  Channel A   │ ─────────────────────────────────────►│    Queue     │
//! │ (connection) │                                       │  "bank"      │
//! └──────────────┘                                       └──────┬───────┘
//!        ▲                                                      │ basic_consume
//!        │ reply_to = "amq.gen-…"                               ▼
//! ┌──────┴───────┐                                       ┌──────────────┐
//! │ exclusive    │◄───────────────────────────────────── │  Channel B   │
//! │ reply queue  │        basic_publish(reply_to)        │ (responder)  │
//! └──────────────┘                                       └──────────────┘
//! ```
//!
//! ## Semantics
//!
//! - **Default exchange only:** the routing key is the queue name.
//! - **Unroutable messages are dropped:** publishing to a missing queue is not
//!   an error, it is reported as [`PublishOutcome::Unroutable`].
//! - **Auto-ack consumption:** a delivery leaves the queue the moment a
//!   consumer receives it. There is no redelivery.
//! - **Exclusive queues** belong to the connection that declared them and are
//!   deleted when that connection closes.
//!
//! ## Attaching Other Processes
//!
//! The broker lives inside the process that builds it. [`BrokerServer`]
//! exposes it over TCP and [`RemoteConnection`] is the other end, so a
//! responder running elsewhere can consume its queue and publish replies.
//! See [`net`] for the framing.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
#![deny(unsafe_code)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod broker;
pub mod channel;
pub mod connection;
pub mod consumer;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod net;

// Re-export main types
pub use broker::{BrokerBuilder, InMemoryBroker};
pub use channel::{Channel, PublishOutcome, QueueInfo, QueueOptions};
pub use connection::Connection;
pub use consumer::Consumer;
pub use endpoint::BrokerEndpoint;
pub use error::BrokerError;
pub use message::{Delivery, MessageProperties};
pub use net::{BrokerServer, RemoteConnection};

/// Maximum messages buffered per queue before publishes are rejected.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Prefix of queue names generated by the broker.
pub const SERVER_NAMED_PREFIX: &str = "amq.gen-";

/// Virtual host used when an endpoint does not name one.
pub const DEFAULT_VHOST: &str = "/";

/// Resolves once `flag` is raised or its sender is dropped.
///
/// Used for closed and shutdown flags; a dropped sender counts as raised.
pub async fn signalled(flag: &mut tokio::sync::watch::Receiver<bool>) {
    let _ = flag.wait_for(|raised| *raised).await;
}
