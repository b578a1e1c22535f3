//! Health responder.
//!
//! Answers any request on the health queue with the gateway's own view of
//! itself. The runtime calls it once at start-up to prove the full
//! publish/consume/reply path works.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use rpc_gateway::{PendingCallTable, RequestContext, RequestHandler};
use serde_json::{json, Value};
use tracing::debug;

/// Replies `{"status": "ok", ...}` with uptime and calls in flight.
pub struct HealthHandler {
    service: String,
    started: Instant,
    table: Arc<PendingCallTable>,
}

impl HealthHandler {
    pub fn new(service: impl Into<String>, table: Arc<PendingCallTable>) -> Self {
        Self {
            service: service.into(),
            started: Instant::now(),
            table,
        }
    }
}

#[async_trait]
impl RequestHandler for HealthHandler {
    async fn handle(&self, request: Value, context: RequestContext) -> Value {
        debug!(
            correlation_id = context.correlation_id.as_deref().unwrap_or_default(),
            reply_to = %context.reply_to,
            "Health check"
        );

        json!({
            "status": "ok",
            "service": self.service,
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_ms": self.started.elapsed().as_millis() as u64,
            "pending_calls": self.table.pending_count(),
            "echo": request,
        })
    }
}
