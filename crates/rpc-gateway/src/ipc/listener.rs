//! Reply Listener - the single consumer of the private reply queue.
//!
//! Every delivery is matched to its pending call by correlation ID. Replies
//! that match nothing, carry no usable ID, or are not JSON are dropped and
//! logged; none of them stops the loop.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use shared_broker::signalled;
use shared_broker::Delivery;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::correlation::CorrelationId;
use crate::domain::pending::PendingCallTable;
use crate::ports::inbound::ReplySource;

/// Why a reply was dropped before reaching the table
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplyError {
    #[error("reply has no correlation id")]
    MissingCorrelationId,
    #[error("reply correlation id '{0}' is not a valid id")]
    InvalidCorrelationId(String),
    #[error("reply body is not valid JSON: {0}")]
    MalformedBody(String),
}

/// What happened to a well-formed reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handed to the waiting caller
    Delivered,
    /// No call is waiting for it (late or spurious)
    Orphaned,
}

/// Listener counters
#[derive(Debug, Default)]
pub struct ListenerStats {
    pub received: AtomicU64,
    pub delivered: AtomicU64,
    pub orphaned: AtomicU64,
    pub discarded: AtomicU64,
    pub panics: AtomicU64,
}

/// Plain copy of [`ListenerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ListenerStatsSnapshot {
    pub received: u64,
    pub delivered: u64,
    pub orphaned: u64,
    pub discarded: u64,
    pub panics: u64,
}

impl ListenerStats {
    pub fn snapshot(&self) -> ListenerStatsSnapshot {
        ListenerStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            orphaned: self.orphaned.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
        }
    }
}

/// Signature of the per-reply routing step; [`dispatch`] by default.
pub type Dispatcher = fn(&PendingCallTable, &Delivery) -> Result<DispatchOutcome, ReplyError>;

/// Demultiplexes replies onto the pending call table.
pub struct ReplyListener<S> {
    source: S,
    table: Arc<PendingCallTable>,
    shutdown: watch::Receiver<bool>,
    stats: Arc<ListenerStats>,
    dispatcher: Dispatcher,
}

impl<S: ReplySource> ReplyListener<S> {
    pub fn new(source: S, table: Arc<PendingCallTable>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            source,
            table,
            shutdown,
            stats: Arc::new(ListenerStats::default()),
            dispatcher: dispatch,
        }
    }

    /// Replace the routing step. The loop still counts outcomes and
    /// contains panics around it.
    pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Shared handle to the counters; stays valid after `run` consumes self
    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    /// Run until the reply stream ends or shutdown is signalled.
    ///
    /// Messages are handled one at a time.
    #[instrument(name = "reply_listener", skip_all)]
    pub async fn run(mut self) {
        info!("Reply listener started");

        loop {
            let next = tokio::select! {
                biased;
                _ = signalled(&mut self.shutdown) => {
                    info!("Reply listener stopping: shutdown requested");
                    break;
                }
                next = self.source.next_reply() => next,
            };

            let Some(delivery) = next else {
                info!("Reply listener stopping: reply stream ended");
                break;
            };

            self.handle(&delivery);
        }
    }

    /// Dispatch one delivery, containing any panic.
    fn handle(&self, delivery: &Delivery) {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let dispatcher = self.dispatcher;
        let result = panic::catch_unwind(AssertUnwindSafe(|| dispatcher(&self.table, delivery)));

        match result {
            Ok(Ok(DispatchOutcome::Delivered)) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Ok(DispatchOutcome::Orphaned)) => {
                self.stats.orphaned.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(
                reason @ (ReplyError::MissingCorrelationId | ReplyError::InvalidCorrelationId(_)),
            )) => {
                // Not addressed to any call of ours
                self.stats.discarded.fetch_add(1, Ordering::Relaxed);
                debug!(
                    delivery_tag = delivery.delivery_tag,
                    error = %reason,
                    "Spurious reply discarded"
                );
            }
            Ok(Err(reason)) => {
                self.stats.discarded.fetch_add(1, Ordering::Relaxed);
                warn!(
                    delivery_tag = delivery.delivery_tag,
                    error = %reason,
                    "Reply discarded"
                );
            }
            Err(_) => {
                self.stats.panics.fetch_add(1, Ordering::Relaxed);
                error!(
                    delivery_tag = delivery.delivery_tag,
                    "Reply dispatch panicked, message dropped"
                );
            }
        }
    }
}

/// Match one reply to its pending call.
pub fn dispatch(table: &PendingCallTable, delivery: &Delivery) -> Result<DispatchOutcome, ReplyError> {
    let raw_id = delivery
        .properties
        .correlation_id
        .as_deref()
        .ok_or(ReplyError::MissingCorrelationId)?;

    let correlation_id = CorrelationId::parse(raw_id)
        .map_err(|_| ReplyError::InvalidCorrelationId(raw_id.to_string()))?;

    // Unknown ids are dropped before the body is even parsed
    if !table.is_pending(&correlation_id) {
        debug!(correlation_id = %correlation_id, "Reply matches no pending call");
        table.stats().orphaned_replies.fetch_add(1, Ordering::Relaxed);
        return Ok(DispatchOutcome::Orphaned);
    }

    let body: Value = serde_json::from_slice(&delivery.body)
        .map_err(|e| ReplyError::MalformedBody(e.to_string()))?;

    if table.complete(&correlation_id, body) {
        Ok(DispatchOutcome::Delivered)
    } else {
        // The deadline won between the lookup and the removal
        Ok(DispatchOutcome::Orphaned)
    }
}
