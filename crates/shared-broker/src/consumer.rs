//! # Consumers
//!
//! Auto-ack consumption of a single queue. Several consumers on one queue
//! compete: each delivery goes to exactly one of them.

use std::sync::{Arc, Weak};

use tokio::sync::watch;
use tracing::debug;

use crate::broker::{BrokerInner, Queue};
use crate::message::Delivery;
use crate::signalled;

/// Stream of deliveries from one queue.
///
/// [`recv`](Self::recv) yields `None` once the connection or channel closes,
/// the queue is deleted, or the broker shuts down.
pub struct Consumer {
    tag: String,
    queue: Arc<Queue>,
    connection_closed: watch::Receiver<bool>,
    channel_closed: watch::Receiver<bool>,
    broker_shutdown: watch::Receiver<bool>,
    queue_deleted: watch::Receiver<bool>,
    broker: Weak<BrokerInner>,
}

impl Consumer {
    pub(crate) fn new(
        tag: String,
        queue: Arc<Queue>,
        connection_closed: watch::Receiver<bool>,
        channel_closed: watch::Receiver<bool>,
        broker_shutdown: watch::Receiver<bool>,
        broker: Weak<BrokerInner>,
    ) -> Self {
        queue.add_consumer();
        let queue_deleted = queue.subscribe_deleted();
        debug!(queue = %queue.name, consumer_tag = %tag, "Consumer started");
        Self {
            tag,
            queue,
            connection_closed,
            channel_closed,
            broker_shutdown,
            queue_deleted,
            broker,
        }
    }

    /// Consumer tag given at `basic_consume`.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Name of the consumed queue.
    #[must_use]
    pub fn queue_name(&self) -> &str {
        &self.queue.name
    }

    /// Wait for the next delivery.
    ///
    /// Cancel safe: a delivery is never lost when the future is dropped.
    pub async fn recv(&mut self) -> Option<Delivery> {
        let receiver = Arc::clone(&self.queue.receiver);
        let next = async { receiver.lock().await.recv().await };

        tokio::select! {
            biased;
            _ = signalled(&mut self.connection_closed) => None,
            _ = signalled(&mut self.channel_closed) => None,
            _ = signalled(&mut self.broker_shutdown) => None,
            _ = signalled(&mut self.queue_deleted) => None,
            delivery = next => delivery,
        }
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        let remaining = self.queue.remove_consumer();
        debug!(queue = %self.queue.name, consumer_tag = %self.tag, "Consumer stopped");

        if remaining == 0 && self.queue.auto_delete {
            if let Some(broker) = self.broker.upgrade() {
                broker.delete_queue(&self.queue);
            }
        }
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("tag", &self.tag)
            .field("queue", &self.queue.name)
            .finish()
    }
}
