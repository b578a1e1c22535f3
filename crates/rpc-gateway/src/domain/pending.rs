//! Pending Call Table - registry of in-flight calls keyed by correlation ID.
//!
//! Each entry owns the single-use completion slot of one call and the abort
//! handle of its deadline timer. Whoever removes the entry first (the reply
//! listener via [`PendingCallTable::complete`] or the timer via
//! [`PendingCallTable::expire`]) resolves the call; the other finds nothing
//! and does nothing.

use crate::domain::correlation::CorrelationId;
use crate::domain::error::CallError;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// What a waiting caller receives: the raw reply body or a failure.
pub type CallOutcome = Result<Value, CallError>;

/// One call awaiting its reply.
pub struct PendingCall {
    /// Single-assignment result slot
    completion: oneshot::Sender<CallOutcome>,
    /// Disarms the deadline timer
    deadline: Option<AbortHandle>,
    /// When the call was registered
    created_at: Instant,
    /// Queue the request went to (for logging)
    destination: String,
    /// Deadline relative to `created_at`
    timeout: Duration,
}

impl PendingCall {
    /// Create an entry and the receiver its caller awaits.
    pub fn new(
        destination: impl Into<String>,
        timeout: Duration,
    ) -> (Self, oneshot::Receiver<CallOutcome>) {
        let (tx, rx) = oneshot::channel();
        let call = Self {
            completion: tx,
            deadline: None,
            created_at: Instant::now(),
            destination: destination.into(),
            timeout,
        };
        (call, rx)
    }

    /// Disarm the timer and hand the outcome to the caller.
    ///
    /// Returns false if the caller stopped waiting.
    fn resolve(self, outcome: CallOutcome) -> bool {
        if let Some(timer) = self.deadline {
            timer.abort();
        }
        self.completion.send(outcome).is_ok()
    }

    fn info(&self) -> PendingCallInfo {
        PendingCallInfo {
            destination: self.destination.clone(),
            created_at: self.created_at,
            timeout: self.timeout,
        }
    }
}

/// Snapshot of a pending call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCallInfo {
    pub destination: String,
    pub created_at: Instant,
    pub timeout: Duration,
}

/// Counters for the pending call table
#[derive(Debug, Default)]
pub struct PendingStats {
    /// Calls registered
    pub registered: AtomicU64,
    /// Calls resolved by a reply
    pub completed: AtomicU64,
    /// Calls resolved by their deadline
    pub timed_out: AtomicU64,
    /// Calls abandoned because the publish failed
    pub publish_failed: AtomicU64,
    /// Replies that matched no pending call
    pub orphaned_replies: AtomicU64,
    /// Calls refused by the admission limit
    pub rejected: AtomicU64,
}

impl PendingStats {
    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> PendingStatsSnapshot {
        PendingStatsSnapshot {
            registered: self.registered.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            publish_failed: self.publish_failed.load(Ordering::Relaxed),
            orphaned_replies: self.orphaned_replies.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`PendingStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PendingStatsSnapshot {
    pub registered: u64,
    pub completed: u64,
    pub timed_out: u64,
    pub publish_failed: u64,
    pub orphaned_replies: u64,
    pub rejected: u64,
}

/// Concurrent map of correlation ID to pending call.
pub struct PendingCallTable {
    calls: DashMap<CorrelationId, PendingCall>,
    /// Admission limit; checked before insert, so it is approximate under
    /// concurrent registration
    max_pending: Option<usize>,
    stats: PendingStats,
}

impl PendingCallTable {
    /// Table without an admission limit
    pub fn new() -> Self {
        Self::with_limit(None)
    }

    /// Table refusing calls once `max_pending` are in flight
    pub fn with_limit(max_pending: Option<usize>) -> Self {
        Self {
            calls: DashMap::new(),
            max_pending,
            stats: PendingStats::default(),
        }
    }

    /// Create an entry with a fresh correlation ID and arm its deadline.
    ///
    /// Returns the ID and the receiver that resolves exactly once.
    pub fn register(
        self: &Arc<Self>,
        destination: &str,
        timeout: Duration,
    ) -> Result<(CorrelationId, oneshot::Receiver<CallOutcome>), CallError> {
        if let Some(limit) = self.max_pending {
            if self.calls.len() >= limit {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    destination = destination,
                    limit = limit,
                    "Pending call limit reached, refusing call"
                );
                return Err(CallError::Overloaded { limit });
            }
        }

        let correlation_id = CorrelationId::new();
        let (call, rx) = PendingCall::new(destination, timeout);
        self.insert(correlation_id, call);
        self.arm_deadline(correlation_id, timeout);

        debug!(
            correlation_id = %correlation_id,
            destination = destination,
            timeout_ms = timeout.as_millis(),
            "Registered pending call"
        );

        Ok((correlation_id, rx))
    }

    /// Insert an entry. IDs are v4 UUIDs and assumed unique.
    pub fn insert(&self, correlation_id: CorrelationId, call: PendingCall) {
        self.calls.insert(correlation_id, call);
        self.stats.registered.fetch_add(1, Ordering::Relaxed);
    }

    /// Spawn the timer that expires `correlation_id` after `timeout`.
    ///
    /// The entry must already be in the table so the timer can never fire
    /// before there is something to remove.
    pub fn arm_deadline(self: &Arc<Self>, correlation_id: CorrelationId, timeout: Duration) {
        let table = Arc::downgrade(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(table) = table.upgrade() {
                table.expire(&correlation_id);
            }
        });

        // Already gone if the reply (or the timer) won in the meantime
        if let Some(mut call) = self.calls.get_mut(&correlation_id) {
            call.deadline = Some(timer.abort_handle());
        }
    }

    /// Atomically take an entry out of the table. Idempotent.
    pub fn remove(&self, correlation_id: &CorrelationId) -> Option<PendingCall> {
        self.calls.remove(correlation_id).map(|(_, call)| call)
    }

    /// Snapshot of an entry
    pub fn get(&self, correlation_id: &CorrelationId) -> Option<PendingCallInfo> {
        self.calls.get(correlation_id).map(|call| call.info())
    }

    /// Resolve a call with its reply body.
    ///
    /// Returns false if no such call is pending (late or spurious reply).
    pub fn complete(&self, correlation_id: &CorrelationId, body: Value) -> bool {
        let Some(call) = self.remove(correlation_id) else {
            self.stats.orphaned_replies.fetch_add(1, Ordering::Relaxed);
            debug!(
                correlation_id = %correlation_id,
                "Reply for unknown or expired correlation ID"
            );
            return false;
        };

        let elapsed = call.created_at.elapsed();
        let destination = call.destination.clone();
        self.stats.completed.fetch_add(1, Ordering::Relaxed);

        if call.resolve(Ok(body)) {
            debug!(
                correlation_id = %correlation_id,
                destination = %destination,
                elapsed_ms = elapsed.as_millis(),
                "Completed pending call"
            );
        } else {
            debug!(
                correlation_id = %correlation_id,
                destination = %destination,
                "Caller stopped waiting before the reply arrived"
            );
        }
        true
    }

    /// Resolve a call with a timeout failure.
    ///
    /// Returns false if the call was already resolved.
    pub fn expire(&self, correlation_id: &CorrelationId) -> bool {
        let Some(call) = self.remove(correlation_id) else {
            return false;
        };

        self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
        warn!(
            correlation_id = %correlation_id,
            destination = %call.destination,
            timeout_ms = call.timeout.as_millis(),
            "Pending call timed out"
        );

        let error = CallError::Timeout {
            destination: call.destination.clone(),
            timeout: call.timeout,
        };
        call.resolve(Err(error));
        true
    }

    /// Drop an entry whose request never left the process.
    pub fn abandon(&self, correlation_id: &CorrelationId) -> bool {
        let Some(call) = self.remove(correlation_id) else {
            return false;
        };
        self.stats.publish_failed.fetch_add(1, Ordering::Relaxed);
        if let Some(timer) = call.deadline {
            timer.abort();
        }
        true
    }

    /// Number of calls in flight
    pub fn pending_count(&self) -> usize {
        self.calls.len()
    }

    /// Check if a correlation ID is pending
    pub fn is_pending(&self, correlation_id: &CorrelationId) -> bool {
        self.calls.contains_key(correlation_id)
    }

    /// Configured admission limit
    pub fn max_pending(&self) -> Option<usize> {
        self.max_pending
    }

    /// Get statistics
    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }
}

impl Default for PendingCallTable {
    fn default() -> Self {
        Self::new()
    }
}
