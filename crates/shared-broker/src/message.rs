//! # Messages
//!
//! Transport metadata and deliveries.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Basic properties carried next to a message body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageProperties {
    /// Token linking a reply to its request.
    pub correlation_id: Option<String>,
    /// Queue the responder should publish its reply to.
    pub reply_to: Option<String>,
    /// MIME type of the body.
    pub content_type: Option<String>,
}

impl MessageProperties {
    /// Set the correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Set the reply-to address.
    #[must_use]
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Set the content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// A message handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Broker-wide delivery sequence number.
    pub delivery_tag: u64,
    /// Routing key the message was published with.
    pub routing_key: String,
    /// Transport metadata.
    pub properties: MessageProperties,
    /// Opaque payload.
    pub body: Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_properties_builder() {
        let props = MessageProperties::default()
            .with_correlation_id("abc")
            .with_reply_to("amq.gen-1")
            .with_content_type("application/json");

        assert_eq!(props.correlation_id.as_deref(), Some("abc"));
        assert_eq!(props.reply_to.as_deref(), Some("amq.gen-1"));
        assert_eq!(props.content_type.as_deref(), Some("application/json"));
    }

    #[test]
    fn test_default_properties_are_empty() {
        let props = MessageProperties::default();
        assert!(props.correlation_id.is_none());
        assert!(props.reply_to.is_none());
    }
}
