//! # Channels
//!
//! Declare queues, publish through the default exchange, start consumers.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::trace;

use crate::connection::Connection;
use crate::consumer::Consumer;
use crate::error::BrokerError;
use crate::message::MessageProperties;

/// Flags for `queue_declare`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueOptions {
    /// Only the declaring connection may use the queue; it is deleted when
    /// that connection closes.
    pub exclusive: bool,
    /// Delete the queue when its last consumer goes away.
    pub auto_delete: bool,
}

impl QueueOptions {
    /// Exclusive, auto-delete. The usual shape of a reply queue.
    #[must_use]
    pub fn exclusive() -> Self {
        Self {
            exclusive: true,
            auto_delete: true,
        }
    }
}

/// Result of `queue_declare`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueInfo {
    /// Queue name, generated by the broker when the request left it empty.
    pub name: String,
    /// Messages waiting.
    pub message_count: usize,
    /// Attached consumers.
    pub consumer_count: usize,
}

/// What happened to a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublishOutcome {
    /// Enqueued on the queue named by the routing key.
    Routed,
    /// No such queue; the message was dropped.
    Unroutable,
}

/// A lightweight session multiplexed on a [`Connection`].
#[derive(Clone)]
pub struct Channel {
    id: u16,
    connection: Connection,
    closed: Arc<watch::Sender<bool>>,
}

impl Channel {
    pub(crate) fn new(id: u16, connection: Connection) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            id,
            connection,
            closed: Arc::new(closed),
        }
    }

    /// Channel number within its connection.
    #[must_use]
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Owning connection.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// False once the channel or its connection is closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !*self.closed.borrow() && self.connection.is_open()
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if !self.connection.is_open() {
            return Err(BrokerError::ConnectionClosed);
        }
        if *self.closed.borrow() {
            return Err(BrokerError::ChannelClosed);
        }
        Ok(())
    }

    /// Declare a queue. An empty `name` asks the broker to generate one.
    ///
    /// Redeclaring an existing queue returns its current counts.
    pub fn queue_declare(&self, name: &str, options: QueueOptions) -> Result<QueueInfo, BrokerError> {
        self.ensure_open()?;
        self.connection.broker().declare_queue(
            self.connection.vhost(),
            name,
            options,
            self.connection.id(),
        )
    }

    /// Publish to the default exchange.
    pub fn basic_publish(
        &self,
        routing_key: &str,
        properties: MessageProperties,
        body: impl Into<Bytes>,
    ) -> Result<PublishOutcome, BrokerError> {
        self.ensure_open()?;
        let body = body.into();
        trace!(
            channel = self.id,
            routing_key = %routing_key,
            bytes = body.len(),
            "basic_publish"
        );
        self.connection
            .broker()
            .route(self.connection.vhost(), routing_key, properties, body)
    }

    /// Start an auto-ack consumer on `queue`.
    pub fn basic_consume(&self, queue: &str, consumer_tag: &str) -> Result<Consumer, BrokerError> {
        self.ensure_open()?;
        let broker = self.connection.broker();
        let target = broker
            .lookup_queue(self.connection.vhost(), queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;

        if !target.accessible_by(self.connection.id()) {
            return Err(BrokerError::ResourceLocked(queue.to_string()));
        }

        Ok(Consumer::new(
            consumer_tag.to_string(),
            target,
            self.connection.subscribe_closed(),
            self.closed.subscribe(),
            broker.subscribe_shutdown(),
            Arc::downgrade(broker),
        ))
    }

    /// Close the channel. Consumers started on it end. Idempotent.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("connection", &self.connection.id())
            .field("open", &self.is_open())
            .finish()
    }
}
