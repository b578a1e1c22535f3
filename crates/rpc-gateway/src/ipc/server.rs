//! RPC Server - the responder half of the request/reply convention.
//!
//! Consumes a shared queue, runs each request through a [`RequestHandler`]
//! on its own task, and publishes the result to the request's `reply_to`
//! with the request's correlation ID.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use shared_broker::signalled;
use shared_broker::{Consumer, Delivery};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::session::TransportSession;
use crate::domain::error::{codes, error_body, TransportError};

/// Request metadata handed to handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Queue the request arrived on
    pub queue: String,
    /// Correlation ID as sent by the caller
    pub correlation_id: Option<String>,
    /// Where the reply goes
    pub reply_to: String,
}

/// Turns a request body into a reply body.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, request: Value, context: RequestContext) -> Value;
}

/// Handler built from an async closure, see [`handler_fn`].
pub struct FnHandler<F>(F);

/// Wrap `f` as a [`RequestHandler`]. The context is not passed to `f`.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Value> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> RequestHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Value> + Send + 'static,
{
    async fn handle(&self, request: Value, _context: RequestContext) -> Value {
        (self.0)(request).await
    }
}

/// Server counters
#[derive(Debug, Default)]
pub struct ServerStats {
    pub requests: AtomicU64,
    pub replies: AtomicU64,
    pub malformed: AtomicU64,
    pub dropped: AtomicU64,
}

/// Responder bound to one queue.
pub struct RpcServer<H> {
    session: Arc<TransportSession>,
    queue: String,
    consumer: Consumer,
    handler: Arc<H>,
    stats: Arc<ServerStats>,
}

impl<H: RequestHandler> RpcServer<H> {
    /// Declare `queue` and start consuming it.
    ///
    /// Requests published after this returns are not lost, even before
    /// [`run`](Self::run) starts.
    pub fn bind(
        session: Arc<TransportSession>,
        queue: &str,
        handler: H,
    ) -> Result<Self, TransportError> {
        let queue = session.declare_queue(queue)?;
        let consumer = session.consume(&queue, &format!("rpc-server-{queue}"))?;

        info!(queue = %queue, "RPC server bound");

        Ok(Self {
            session,
            queue,
            consumer,
            handler: Arc::new(handler),
            stats: Arc::new(ServerStats::default()),
        })
    }

    /// Queue being served
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Shared handle to the counters
    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.stats)
    }

    /// Serve until the consumer ends or `shutdown` is raised.
    #[instrument(name = "rpc_server", skip_all, fields(queue = %self.queue))]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let next = tokio::select! {
                biased;
                _ = signalled(&mut shutdown) => {
                    info!("RPC server stopping: shutdown requested");
                    break;
                }
                next = self.consumer.recv() => next,
            };

            let Some(delivery) = next else {
                info!("RPC server stopping: consumer ended");
                break;
            };

            self.stats.requests.fetch_add(1, Ordering::Relaxed);
            let session = Arc::clone(&self.session);
            let handler = Arc::clone(&self.handler);
            let stats = Arc::clone(&self.stats);
            let queue = self.queue.clone();
            tokio::spawn(async move {
                respond(&session, handler.as_ref(), &stats, queue, delivery).await;
            });
        }
    }

    /// Run on a background task.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

async fn respond<H: RequestHandler>(
    session: &TransportSession,
    handler: &H,
    stats: &ServerStats,
    queue: String,
    delivery: Delivery,
) {
    let Some(reply_to) = delivery.properties.reply_to.clone() else {
        stats.dropped.fetch_add(1, Ordering::Relaxed);
        warn!(
            queue = %queue,
            delivery_tag = delivery.delivery_tag,
            "Request without reply_to dropped"
        );
        return;
    };
    let correlation_id = delivery.properties.correlation_id.clone();

    let response = match serde_json::from_slice::<Value>(&delivery.body) {
        Ok(request) => {
            let context = RequestContext {
                queue,
                correlation_id: correlation_id.clone(),
                reply_to: reply_to.clone(),
            };
            handler.handle(request, context).await
        }
        Err(e) => {
            stats.malformed.fetch_add(1, Ordering::Relaxed);
            warn!(
                correlation_id = correlation_id.as_deref().unwrap_or_default(),
                error = %e,
                "Malformed request body"
            );
            error_body(codes::PARSE_ERROR, format!("malformed request: {e}"))
        }
    };

    let body = match serde_json::to_vec(&response) {
        Ok(body) => Bytes::from(body),
        Err(e) => {
            error!(error = %e, "Reply could not be serialized");
            return;
        }
    };

    match session.publish(&reply_to, body, correlation_id.as_deref(), None) {
        Ok(()) => {
            stats.replies.fetch_add(1, Ordering::Relaxed);
            debug!(
                correlation_id = correlation_id.as_deref().unwrap_or_default(),
                reply_to = %reply_to,
                "Reply published"
            );
        }
        Err(e) => {
            warn!(reply_to = %reply_to, error = %e, "Reply publish failed");
        }
    }
}
