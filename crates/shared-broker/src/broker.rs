//! # In-Memory Broker
//!
//! Owns the queue registry and admits connections.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::{PublishOutcome, QueueInfo, QueueOptions};
use crate::connection::Connection;
use crate::endpoint::{BrokerEndpoint, DEFAULT_CREDENTIAL};
use crate::error::BrokerError;
use crate::message::{Delivery, MessageProperties};
use crate::{DEFAULT_QUEUE_CAPACITY, DEFAULT_VHOST, SERVER_NAMED_PREFIX};

/// Queues are keyed by `(vhost, name)`.
type QueueKey = (String, String);

/// A single queue.
pub(crate) struct Queue {
    pub(crate) name: String,
    pub(crate) vhost: String,
    /// Connection that declared the queue exclusively.
    pub(crate) owner: Option<u64>,
    pub(crate) auto_delete: bool,
    sender: mpsc::Sender<Delivery>,
    /// Shared by competing consumers; whoever holds the lock receives next.
    pub(crate) receiver: Arc<AsyncMutex<mpsc::Receiver<Delivery>>>,
    deleted: watch::Sender<bool>,
    consumers: AtomicUsize,
}

impl Queue {
    fn new(name: String, vhost: String, options: QueueOptions, owner: u64, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        let (deleted, _) = watch::channel(false);
        Self {
            name,
            vhost,
            owner: options.exclusive.then_some(owner),
            auto_delete: options.auto_delete,
            sender,
            receiver: Arc::new(AsyncMutex::new(receiver)),
            deleted,
            consumers: AtomicUsize::new(0),
        }
    }

    pub(crate) fn depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub(crate) fn consumer_count(&self) -> usize {
        self.consumers.load(Ordering::Acquire)
    }

    pub(crate) fn add_consumer(&self) {
        self.consumers.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns the number of consumers left.
    pub(crate) fn remove_consumer(&self) -> usize {
        self.consumers.fetch_sub(1, Ordering::AcqRel).saturating_sub(1)
    }

    pub(crate) fn subscribe_deleted(&self) -> watch::Receiver<bool> {
        self.deleted.subscribe()
    }

    fn mark_deleted(&self) {
        self.deleted.send_replace(true);
    }

    /// Whether `connection_id` may declare or consume this queue.
    pub(crate) fn accessible_by(&self, connection_id: u64) -> bool {
        self.owner.map_or(true, |owner| owner == connection_id)
    }
}

/// Shared broker state.
pub(crate) struct BrokerInner {
    host: String,
    users: HashMap<String, String>,
    vhosts: HashSet<String>,
    queue_capacity: usize,
    queues: RwLock<HashMap<QueueKey, Arc<Queue>>>,
    next_connection_id: AtomicU64,
    next_delivery_tag: AtomicU64,
    open_connections: AtomicUsize,
    messages_published: AtomicU64,
    shutdown: watch::Sender<bool>,
}

impl BrokerInner {
    pub(crate) fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub(crate) fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub(crate) fn lookup_queue(&self, vhost: &str, name: &str) -> Option<Arc<Queue>> {
        self.queues
            .read()
            .get(&(vhost.to_string(), name.to_string()))
            .cloned()
    }

    pub(crate) fn declare_queue(
        &self,
        vhost: &str,
        name: &str,
        options: QueueOptions,
        connection_id: u64,
    ) -> Result<QueueInfo, BrokerError> {
        let name = if name.is_empty() {
            format!("{}{}", SERVER_NAMED_PREFIX, Uuid::new_v4().simple())
        } else {
            name.to_string()
        };

        let mut queues = self.queues.write();
        let key = (vhost.to_string(), name.clone());

        if let Some(existing) = queues.get(&key) {
            if !existing.accessible_by(connection_id) {
                return Err(BrokerError::ResourceLocked(name));
            }
            return Ok(QueueInfo {
                name,
                message_count: existing.depth(),
                consumer_count: existing.consumer_count(),
            });
        }

        let queue = Queue::new(
            name.clone(),
            vhost.to_string(),
            options,
            connection_id,
            self.queue_capacity,
        );
        queues.insert(key, Arc::new(queue));

        debug!(
            queue = %name,
            vhost = %vhost,
            exclusive = options.exclusive,
            auto_delete = options.auto_delete,
            "Queue declared"
        );

        Ok(QueueInfo {
            name,
            message_count: 0,
            consumer_count: 0,
        })
    }

    pub(crate) fn route(
        &self,
        vhost: &str,
        routing_key: &str,
        properties: MessageProperties,
        body: Bytes,
    ) -> Result<PublishOutcome, BrokerError> {
        if self.is_shut_down() {
            return Err(BrokerError::ConnectionClosed);
        }
        self.messages_published.fetch_add(1, Ordering::Relaxed);

        let Some(queue) = self.lookup_queue(vhost, routing_key) else {
            debug!(routing_key = %routing_key, "Message unroutable, dropped");
            return Ok(PublishOutcome::Unroutable);
        };

        let delivery = Delivery {
            delivery_tag: self.next_delivery_tag.fetch_add(1, Ordering::Relaxed) + 1,
            routing_key: routing_key.to_string(),
            properties,
            body,
        };

        match queue.sender.try_send(delivery) {
            Ok(()) => Ok(PublishOutcome::Routed),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(queue = %queue.name, "Queue full, publish rejected");
                Err(BrokerError::QueueFull(queue.name.clone()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Ok(PublishOutcome::Unroutable),
        }
    }

    /// Delete `queue` if it is still the registered instance.
    pub(crate) fn delete_queue(&self, queue: &Arc<Queue>) {
        let key = (queue.vhost.clone(), queue.name.clone());
        let mut queues = self.queues.write();
        if queues.get(&key).is_some_and(|q| Arc::ptr_eq(q, queue)) {
            queues.remove(&key);
            queue.mark_deleted();
            debug!(queue = %queue.name, "Queue deleted");
        }
    }

    /// Drop every exclusive queue owned by a closing connection.
    pub(crate) fn release_connection(&self, connection_id: u64) {
        let mut removed = 0usize;
        self.queues.write().retain(|_, queue| {
            if queue.owner == Some(connection_id) {
                queue.mark_deleted();
                removed += 1;
                false
            } else {
                true
            }
        });
        self.open_connections.fetch_sub(1, Ordering::AcqRel);
        debug!(
            connection_id = connection_id,
            exclusive_queues_removed = removed,
            "Connection released"
        );
    }
}

/// Builder for [`InMemoryBroker`].
pub struct BrokerBuilder {
    host: String,
    users: HashMap<String, String>,
    vhosts: HashSet<String>,
    queue_capacity: usize,
}

impl BrokerBuilder {
    /// Accept a user.
    #[must_use]
    pub fn user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(username.into(), password.into());
        self
    }

    /// Serve an additional virtual host. The default vhost is always served.
    #[must_use]
    pub fn vhost(mut self, vhost: impl Into<String>) -> Self {
        self.vhosts.insert(vhost.into());
        self
    }

    /// Per-queue buffer size.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Build the broker.
    #[must_use]
    pub fn build(self) -> InMemoryBroker {
        let (shutdown, _) = watch::channel(false);
        InMemoryBroker {
            inner: Arc::new(BrokerInner {
                host: self.host,
                users: self.users,
                vhosts: self.vhosts,
                queue_capacity: self.queue_capacity,
                queues: RwLock::new(HashMap::new()),
                next_connection_id: AtomicU64::new(0),
                next_delivery_tag: AtomicU64::new(0),
                open_connections: AtomicUsize::new(0),
                messages_published: AtomicU64::new(0),
                shutdown,
            }),
        }
    }
}

/// In-memory message broker.
///
/// Clones share the same queues and connections. Other processes reach it
/// through a [`crate::BrokerServer`].
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    /// Broker on `host` accepting the `guest`/`guest` user on the default vhost.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self::builder(host)
            .user(DEFAULT_CREDENTIAL, DEFAULT_CREDENTIAL)
            .build()
    }

    /// Start building a broker with no users.
    #[must_use]
    pub fn builder(host: impl Into<String>) -> BrokerBuilder {
        let mut vhosts = HashSet::new();
        vhosts.insert(DEFAULT_VHOST.to_string());
        BrokerBuilder {
            host: host.into(),
            users: HashMap::new(),
            vhosts,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Open a connection.
    ///
    /// The endpoint host must match the broker host; the port is not checked.
    pub fn connect(&self, endpoint: &BrokerEndpoint) -> Result<Connection, BrokerError> {
        let inner = &self.inner;

        if inner.is_shut_down() {
            return Err(BrokerError::ConnectionRefused(format!(
                "broker at {} is shut down",
                endpoint.address()
            )));
        }
        if endpoint.host != inner.host {
            return Err(BrokerError::ConnectionRefused(format!(
                "no broker listening at {}",
                endpoint.address()
            )));
        }
        match inner.users.get(&endpoint.username) {
            Some(password) if *password == endpoint.password => {}
            _ => return Err(BrokerError::AccessRefused(endpoint.username.clone())),
        }
        if !inner.vhosts.contains(&endpoint.vhost) {
            return Err(BrokerError::UnknownVhost(endpoint.vhost.clone()));
        }

        let id = inner.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1;
        inner.open_connections.fetch_add(1, Ordering::AcqRel);

        info!(
            connection_id = id,
            endpoint = %endpoint,
            "Broker connection opened"
        );

        Ok(Connection::new(
            id,
            endpoint.username.clone(),
            endpoint.vhost.clone(),
            Arc::clone(inner),
        ))
    }

    /// Simulate an outage: close every connection and refuse new ones.
    pub fn shutdown(&self) {
        if self.inner.shutdown.send_replace(true) {
            return;
        }
        let mut queues = self.inner.queues.write();
        for queue in queues.values() {
            queue.mark_deleted();
        }
        queues.clear();
        warn!(host = %self.inner.host, "Broker shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) was called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.is_shut_down()
    }

    /// Host this broker answers to.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.inner.host
    }

    /// Whether a queue exists.
    #[must_use]
    pub fn queue_exists(&self, vhost: &str, name: &str) -> bool {
        self.inner.lookup_queue(vhost, name).is_some()
    }

    /// Number of messages waiting in a queue.
    #[must_use]
    pub fn queue_depth(&self, vhost: &str, name: &str) -> Option<usize> {
        self.inner.lookup_queue(vhost, name).map(|q| q.depth())
    }

    /// Number of consumers attached to a queue.
    #[must_use]
    pub fn consumer_count(&self, vhost: &str, name: &str) -> Option<usize> {
        self.inner
            .lookup_queue(vhost, name)
            .map(|q| q.consumer_count())
    }

    /// Number of open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.open_connections.load(Ordering::Acquire)
    }

    /// Total publishes attempted, including unroutable ones.
    #[must_use]
    pub fn messages_published(&self) -> u64 {
        self.inner.messages_published.load(Ordering::Relaxed)
    }
}
