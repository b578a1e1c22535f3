//! Adapters binding the ports to the broker.

pub mod session;

pub use session::{SessionState, TransportSession, JSON_CONTENT_TYPE, REPLY_CONSUMER_TAG};
