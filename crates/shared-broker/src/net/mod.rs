//! # Attach Protocol
//!
//! Lets processes outside the broker's own process declare queues, publish
//! and consume over TCP.
//!
//! ## Framing
//!
//! ```text
//! [length:4][payload:N]
//! ```
//!
//! - **length**: payload size in bytes (little-endian u32)
//! - **payload**: one JSON-encoded [`ClientFrame`] or [`ServerFrame`]
//!
//! ## Session
//!
//! The first client frame must be [`ClientFrame::Open`]; the server answers
//! with [`ServerFrame::Opened`] or an error and then hangs up. After that every
//! client frame gets exactly one answer, in order. [`ServerFrame::Deliver`]
//! frames for started consumers are interleaved with the answers.
//!
//! One attached client maps onto one broker connection with one channel, so
//! exclusive queues it declares die with the socket.

mod client;
mod server;

pub use client::RemoteConnection;
pub use server::BrokerServer;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::channel::{PublishOutcome, QueueOptions};
use crate::error::BrokerError;
use crate::message::{Delivery, MessageProperties};

/// Frames larger than this are rejected.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Frames sent by an attached client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Authenticate and pick a vhost
    Open {
        username: String,
        password: String,
        vhost: String,
    },
    /// `queue_declare`; an empty name asks for a server-named queue
    Declare { queue: String, options: QueueOptions },
    /// `basic_publish` on the default exchange
    Publish {
        routing_key: String,
        properties: MessageProperties,
        body: Vec<u8>,
    },
    /// `basic_consume`; deliveries come back tagged with `consumer_tag`
    Consume { queue: String, consumer_tag: String },
    /// Close the broker connection and the socket
    Close,
}

/// Frames sent by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Opened { connection_id: u64 },
    Declared { queue: String },
    Published { outcome: PublishOutcome },
    Consuming { consumer_tag: String },
    Closed,
    /// The request failed; the session stays usable unless it was `Open`
    Error { error: BrokerError },
    Deliver {
        consumer_tag: String,
        delivery_tag: u64,
        routing_key: String,
        properties: MessageProperties,
        body: Vec<u8>,
    },
}

impl ServerFrame {
    fn deliver(consumer_tag: &str, delivery: Delivery) -> Self {
        Self::Deliver {
            consumer_tag: consumer_tag.to_string(),
            delivery_tag: delivery.delivery_tag,
            routing_key: delivery.routing_key,
            properties: delivery.properties,
            body: delivery.body.to_vec(),
        }
    }
}

/// Write one length-prefixed frame.
pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<(), BrokerError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(frame).map_err(|e| BrokerError::Protocol(e.to_string()))?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(BrokerError::Protocol(format!(
            "frame too large: {} bytes (max {MAX_FRAME_SIZE})",
            payload.len()
        )));
    }

    let length = u32::try_from(payload.len()).map_err(|e| BrokerError::Protocol(e.to_string()))?;
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&length.to_le_bytes());
    buf.extend_from_slice(&payload);

    writer.write_all(&buf).await.map_err(io_error)?;
    writer.flush().await.map_err(io_error)
}

/// Read one length-prefixed frame. `Ok(None)` on a clean end of stream
/// between frames.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, BrokerError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(io_error(e)),
    }

    let length = u32::from_le_bytes(header) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(BrokerError::Protocol(format!(
            "frame too large: {length} bytes (max {MAX_FRAME_SIZE})"
        )));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await.map_err(io_error)?;

    serde_json::from_slice(&payload)
        .map(Some)
        .map_err(|e| BrokerError::Protocol(format!("bad frame: {e}")))
}

fn io_error(err: std::io::Error) -> BrokerError {
    BrokerError::Protocol(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_survive_the_wire() {
        let (mut left, mut right) = tokio::io::duplex(4096);
        let sent = ClientFrame::Publish {
            routing_key: "bank".into(),
            properties: MessageProperties::default().with_correlation_id("c-1"),
            body: b"{\"op\":\"balance\"}".to_vec(),
        };

        write_frame(&mut left, &sent).await.unwrap();
        write_frame(&mut left, &ClientFrame::Close).await.unwrap();
        drop(left);

        let first: Option<ClientFrame> = read_frame(&mut right).await.unwrap();
        assert_eq!(first, Some(sent));
        let second: Option<ClientFrame> = read_frame(&mut right).await.unwrap();
        assert_eq!(second, Some(ClientFrame::Close));
        let end: Option<ClientFrame> = read_frame(&mut right).await.unwrap();
        assert_eq!(end, None);
    }

    #[tokio::test]
    async fn test_oversized_length_rejected() {
        let (mut left, mut right) = tokio::io::duplex(64);
        left.write_all(&u32::MAX.to_le_bytes()).await.unwrap();

        let result: Result<Option<ClientFrame>, _> = read_frame(&mut right).await;
        assert!(matches!(result, Err(BrokerError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_an_error() {
        let (mut left, mut right) = tokio::io::duplex(64);
        left.write_all(&10u32.to_le_bytes()).await.unwrap();
        left.write_all(b"{\"ty").await.unwrap();
        drop(left);

        let result: Result<Option<ClientFrame>, _> = read_frame(&mut right).await;
        assert!(matches!(result, Err(BrokerError::Protocol(_))));
    }

    #[test]
    fn test_frame_tagging() {
        let json = serde_json::to_value(ServerFrame::Declared {
            queue: "amq.gen-1".into(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "declared", "queue": "amq.gen-1"}));
    }
}
