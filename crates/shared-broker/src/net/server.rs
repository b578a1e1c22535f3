//! TCP listener that attaches remote clients to an [`InMemoryBroker`].

use std::net::SocketAddr;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::{read_frame, write_frame, ClientFrame, ServerFrame};
use crate::broker::InMemoryBroker;
use crate::channel::Channel;
use crate::connection::Connection;
use crate::endpoint::{BrokerEndpoint, DEFAULT_PORT};
use crate::error::BrokerError;
use crate::signalled;

/// Frames queued for one client before deliveries wait on the socket.
const OUTBOUND_BUFFER: usize = 256;

/// Accepts attach-protocol clients for one broker.
pub struct BrokerServer {
    broker: InMemoryBroker,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl BrokerServer {
    /// Listen on `addr`. Port `0` picks a free port; see [`Self::local_addr`].
    pub async fn bind(broker: InMemoryBroker, addr: &str) -> Result<Self, BrokerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BrokerError::ConnectionRefused(format!("cannot listen on {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| BrokerError::Protocol(e.to_string()))?;

        info!(addr = %local_addr, host = %broker.host(), "Broker accepting attached clients");
        Ok(Self {
            broker,
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept clients until `shutdown` is raised. Attached sessions end with
    /// it.
    #[instrument(name = "broker_server", skip_all, fields(addr = %self.local_addr))]
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = signalled(&mut shutdown) => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(serve_client(
                        self.broker.clone(),
                        stream,
                        peer,
                        shutdown.clone(),
                    ));
                }
                Err(e) => warn!(error = %e, "Accept failed"),
            }
        }

        info!("Broker listener stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[instrument(name = "attached_client", skip_all, fields(peer = %peer))]
async fn serve_client(
    broker: InMemoryBroker,
    stream: TcpStream,
    peer: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) {
    let (mut reader, writer) = stream.into_split();
    let (outbound, queued) = mpsc::channel(OUTBOUND_BUFFER);
    let writer_task = tokio::spawn(write_loop(writer, queued));

    let (connection, channel) = match open_session(&broker, &mut reader).await {
        Ok(session) => session,
        Err(error) => {
            warn!(error = %error, "Attach refused");
            let _ = outbound.send(ServerFrame::Error { error }).await;
            drop(outbound);
            let _ = writer_task.await;
            return;
        }
    };

    info!(connection_id = connection.id(), user = %connection.username(), "Client attached");
    let _ = outbound
        .send(ServerFrame::Opened {
            connection_id: connection.id(),
        })
        .await;

    loop {
        let next = tokio::select! {
            biased;
            _ = signalled(&mut shutdown) => break,
            next = read_frame::<_, ClientFrame>(&mut reader) => next,
        };

        let frame = match next {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Dropping client after bad frame");
                break;
            }
        };

        if matches!(frame, ClientFrame::Close) {
            let _ = outbound.send(ServerFrame::Closed).await;
            break;
        }

        let answer = handle_frame(&channel, frame, &outbound);
        if outbound.send(answer).await.is_err() {
            break;
        }
    }

    connection.close();
    drop(outbound);
    let _ = writer_task.await;
    info!(connection_id = connection.id(), "Client detached");
}

async fn open_session(
    broker: &InMemoryBroker,
    reader: &mut OwnedReadHalf,
) -> Result<(Connection, Channel), BrokerError> {
    let (username, password, vhost) = match read_frame(reader).await? {
        Some(ClientFrame::Open {
            username,
            password,
            vhost,
        }) => (username, password, vhost),
        Some(_) => return Err(BrokerError::Protocol("expected open frame".into())),
        None => return Err(BrokerError::ConnectionClosed),
    };

    let endpoint = BrokerEndpoint {
        host: broker.host().to_string(),
        port: DEFAULT_PORT,
        username,
        password,
        vhost,
    };
    let connection = broker.connect(&endpoint)?;
    let channel = connection.create_channel()?;
    Ok((connection, channel))
}

fn handle_frame(
    channel: &Channel,
    frame: ClientFrame,
    outbound: &mpsc::Sender<ServerFrame>,
) -> ServerFrame {
    let result = match frame {
        ClientFrame::Declare { queue, options } => channel
            .queue_declare(&queue, options)
            .map(|info| ServerFrame::Declared { queue: info.name }),
        ClientFrame::Publish {
            routing_key,
            properties,
            body,
        } => channel
            .basic_publish(&routing_key, properties, body)
            .map(|outcome| ServerFrame::Published { outcome }),
        ClientFrame::Consume {
            queue,
            consumer_tag,
        } => channel.basic_consume(&queue, &consumer_tag).map(|consumer| {
            debug!(queue = %queue, consumer_tag = %consumer_tag, "Remote consumer started");
            tokio::spawn(forward_deliveries(consumer, outbound.clone()));
            ServerFrame::Consuming { consumer_tag }
        }),
        ClientFrame::Open { .. } => Err(BrokerError::Protocol("session already open".into())),
        ClientFrame::Close => Ok(ServerFrame::Closed),
    };

    result.unwrap_or_else(|error| ServerFrame::Error { error })
}

async fn forward_deliveries(mut consumer: crate::Consumer, outbound: mpsc::Sender<ServerFrame>) {
    while let Some(delivery) = consumer.recv().await {
        let frame = ServerFrame::deliver(consumer.tag(), delivery);
        if outbound.send(frame).await.is_err() {
            break;
        }
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut queued: mpsc::Receiver<ServerFrame>) {
    while let Some(frame) = queued.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            debug!(error = %e, "Client socket closed");
            break;
        }
    }
}
