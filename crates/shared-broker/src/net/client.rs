//! Client side of the attach protocol.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{read_frame, write_frame, ClientFrame, ServerFrame};
use crate::channel::{PublishOutcome, QueueOptions};
use crate::endpoint::BrokerEndpoint;
use crate::error::BrokerError;
use crate::message::{Delivery, MessageProperties};

/// Deliveries buffered per remote consumer.
const CONSUMER_BUFFER: usize = 256;

#[derive(Default)]
struct Shared {
    answers: Mutex<Answers>,
    consumers: Mutex<HashMap<String, mpsc::Sender<Delivery>>>,
}

#[derive(Default)]
struct Answers {
    /// Set once the reader is gone; no slot will be filled after that
    closed: bool,
    /// One slot per request in flight, oldest first
    slots: VecDeque<oneshot::Sender<ServerFrame>>,
}

/// A broker connection held over TCP by a process that does not host the
/// broker.
///
/// Carries one channel. Requests are answered in the order they were sent;
/// dropping a request future mid-write leaves the socket unusable.
pub struct RemoteConnection {
    connection_id: u64,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    shared: Arc<Shared>,
    reader: JoinHandle<()>,
}

impl RemoteConnection {
    /// Dial `addr` and authenticate with the endpoint's user, password and
    /// vhost. The endpoint's host and port are not used.
    pub async fn connect(addr: &str, endpoint: &BrokerEndpoint) -> Result<Self, BrokerError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| BrokerError::ConnectionRefused(format!("{addr}: {e}")))?;
        let (reader, writer) = stream.into_split();

        let shared = Arc::new(Shared::default());
        let mut connection = Self {
            connection_id: 0,
            writer: tokio::sync::Mutex::new(writer),
            shared: Arc::clone(&shared),
            reader: tokio::spawn(read_loop(reader, shared)),
        };

        let opened = connection
            .request(ClientFrame::Open {
                username: endpoint.username.clone(),
                password: endpoint.password.clone(),
                vhost: endpoint.vhost.clone(),
            })
            .await?;

        match opened {
            ServerFrame::Opened { connection_id } => {
                info!(addr = %addr, connection_id, "Attached to broker");
                connection.connection_id = connection_id;
                Ok(connection)
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Id of the broker-side connection.
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Declare a queue and return its name (generated when `name` is empty).
    pub async fn queue_declare(
        &self,
        name: &str,
        options: QueueOptions,
    ) -> Result<String, BrokerError> {
        let answer = self
            .request(ClientFrame::Declare {
                queue: name.to_string(),
                options,
            })
            .await?;

        match answer {
            ServerFrame::Declared { queue } => Ok(queue),
            other => Err(unexpected(&other)),
        }
    }

    /// Publish to the default exchange.
    pub async fn basic_publish(
        &self,
        routing_key: &str,
        properties: MessageProperties,
        body: impl Into<Vec<u8>>,
    ) -> Result<PublishOutcome, BrokerError> {
        let answer = self
            .request(ClientFrame::Publish {
                routing_key: routing_key.to_string(),
                properties,
                body: body.into(),
            })
            .await?;

        match answer {
            ServerFrame::Published { outcome } => Ok(outcome),
            other => Err(unexpected(&other)),
        }
    }

    /// Start an auto-ack consumer. The receiver ends when the consumer or the
    /// connection does.
    pub async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<mpsc::Receiver<Delivery>, BrokerError> {
        let (sender, receiver) = mpsc::channel(CONSUMER_BUFFER);
        // Registered first: deliveries may overtake the answer
        self.shared
            .consumers
            .lock()
            .insert(consumer_tag.to_string(), sender);

        let answer = self
            .request(ClientFrame::Consume {
                queue: queue.to_string(),
                consumer_tag: consumer_tag.to_string(),
            })
            .await;

        match answer {
            Ok(ServerFrame::Consuming { .. }) => Ok(receiver),
            Ok(other) => {
                self.shared.consumers.lock().remove(consumer_tag);
                Err(unexpected(&other))
            }
            Err(e) => {
                self.shared.consumers.lock().remove(consumer_tag);
                Err(e)
            }
        }
    }

    /// Close the broker connection. Exclusive queues it declared are deleted.
    pub async fn close(&self) -> Result<(), BrokerError> {
        match self.request(ClientFrame::Close).await? {
            ServerFrame::Closed => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    async fn request(&self, frame: ClientFrame) -> Result<ServerFrame, BrokerError> {
        let (slot, answer) = oneshot::channel();
        {
            let mut writer = self.writer.lock().await;
            {
                let mut answers = self.shared.answers.lock();
                if answers.closed {
                    return Err(BrokerError::ConnectionClosed);
                }
                answers.slots.push_back(slot);
            }
            if let Err(e) = write_frame(&mut *writer, &frame).await {
                // Still holding the writer, so the slot is ours
                self.shared.answers.lock().slots.pop_back();
                return Err(e);
            }
        }

        match answer.await {
            Ok(ServerFrame::Error { error }) => Err(error),
            Ok(frame) => Ok(frame),
            Err(_) => Err(BrokerError::ConnectionClosed),
        }
    }
}

impl Drop for RemoteConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl std::fmt::Debug for RemoteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConnection")
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}

async fn read_loop(mut reader: OwnedReadHalf, shared: Arc<Shared>) {
    loop {
        let frame = match read_frame::<_, ServerFrame>(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "Broker socket failed");
                break;
            }
        };

        match frame {
            ServerFrame::Deliver {
                consumer_tag,
                delivery_tag,
                routing_key,
                properties,
                body,
            } => {
                let Some(sender) = shared.consumers.lock().get(&consumer_tag).cloned() else {
                    debug!(consumer_tag = %consumer_tag, "Delivery for unknown consumer dropped");
                    continue;
                };
                let delivery = Delivery {
                    delivery_tag,
                    routing_key,
                    properties,
                    body: Bytes::from(body),
                };
                if sender.send(delivery).await.is_err() {
                    shared.consumers.lock().remove(&consumer_tag);
                }
            }
            answer => match shared.answers.lock().slots.pop_front() {
                Some(slot) => {
                    let _ = slot.send(answer);
                }
                None => warn!(frame = ?answer, "Unsolicited frame from broker"),
            },
        }
    }

    // Waiters see ConnectionClosed, consumers see the end of their stream
    {
        let mut answers = shared.answers.lock();
        answers.closed = true;
        answers.slots.clear();
    }
    shared.consumers.lock().clear();
}

fn unexpected(frame: &ServerFrame) -> BrokerError {
    BrokerError::Protocol(format!("unexpected answer: {frame:?}"))
}
