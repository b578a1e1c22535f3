//! # Connections
//!
//! A connection carries channels and owns exclusive queues. Closing it, or
//! dropping the last handle, deletes those queues and ends their consumers.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::broker::BrokerInner;
use crate::channel::Channel;
use crate::error::BrokerError;

pub(crate) struct ConnectionInner {
    id: u64,
    username: String,
    vhost: String,
    broker: Arc<BrokerInner>,
    closed: watch::Sender<bool>,
    next_channel_id: AtomicU16,
}

impl ConnectionInner {
    fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        self.broker.release_connection(self.id);
        info!(connection_id = self.id, "Broker connection closed");
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        self.close();
    }
}

/// Handle to an open broker connection. Clones share the connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub(crate) fn new(id: u64, username: String, vhost: String, broker: Arc<BrokerInner>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(ConnectionInner {
                id,
                username,
                vhost,
                broker,
                closed,
                next_channel_id: AtomicU16::new(0),
            }),
        }
    }

    /// Broker-assigned connection id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Authenticated user.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.inner.username
    }

    /// Virtual host the connection is bound to.
    #[must_use]
    pub fn vhost(&self) -> &str {
        &self.inner.vhost
    }

    /// False once closed locally or by a broker shutdown.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !*self.inner.closed.borrow() && !self.inner.broker.is_shut_down()
    }

    /// Open a channel.
    pub fn create_channel(&self) -> Result<Channel, BrokerError> {
        if !self.is_open() {
            return Err(BrokerError::ConnectionClosed);
        }
        let id = self.inner.next_channel_id.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Channel::new(id, self.clone()))
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }

    pub(crate) fn broker(&self) -> &Arc<BrokerInner> {
        &self.inner.broker
    }

    pub(crate) fn subscribe_closed(&self) -> watch::Receiver<bool> {
        self.inner.closed.subscribe()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("vhost", &self.inner.vhost)
            .field("open", &self.is_open())
            .finish()
    }
}
