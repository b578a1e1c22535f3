//! Inbound port feeding the reply listener.

use async_trait::async_trait;
use shared_broker::{Consumer, Delivery};
use tokio::sync::mpsc;

/// Stream of reply deliveries.
#[async_trait]
pub trait ReplySource: Send {
    /// Next reply, or `None` once the stream has ended for good.
    async fn next_reply(&mut self) -> Option<Delivery>;
}

#[async_trait]
impl ReplySource for Consumer {
    async fn next_reply(&mut self) -> Option<Delivery> {
        self.recv().await
    }
}

/// In-process source, used to drive the listener without a broker.
#[async_trait]
impl ReplySource for mpsc::Receiver<Delivery> {
    async fn next_reply(&mut self) -> Option<Delivery> {
        self.recv().await
    }
}
