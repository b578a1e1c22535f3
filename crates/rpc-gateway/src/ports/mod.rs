//! Ports between the call machinery and the transport.
//!
//! The client publishes through [`RequestPublisher`]; the reply listener
//! reads from a [`ReplySource`]. The broker-backed session implements both.

pub mod inbound;
pub mod outbound;

pub use inbound::ReplySource;
pub use outbound::{OutboundRequest, RequestPublisher};
