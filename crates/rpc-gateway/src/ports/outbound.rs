//! Outbound ports for the RPC client.

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::correlation::CorrelationId;
use crate::domain::error::TransportError;

/// A serialized request ready for the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    /// Echoed back by the responder
    pub correlation_id: CorrelationId,
    /// Queue the responder should reply to
    pub reply_to: String,
    /// JSON body
    pub body: Bytes,
}

/// Publishes requests and names the reply address replies must use.
#[async_trait]
pub trait RequestPublisher: Send + Sync {
    /// Reply address stamped on every request
    fn reply_to(&self) -> &str;

    /// Publish `request` to the queue `destination`.
    async fn publish(&self, destination: &str, request: OutboundRequest)
        -> Result<(), TransportError>;
}
