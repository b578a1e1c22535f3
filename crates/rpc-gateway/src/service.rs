//! RPC Gateway service - wires session, listener, table and client.

use crate::adapters::session::{SessionState, TransportSession};
use crate::domain::config::GatewayConfig;
use crate::domain::error::{ConnectionError, GatewayError};
use crate::domain::pending::{PendingCallTable, PendingStatsSnapshot};
use crate::ipc::client::RpcClient;
use crate::ipc::listener::{ListenerStats, ListenerStatsSnapshot, ReplyListener};
use crate::ports::outbound::RequestPublisher;
use parking_lot::Mutex;
use shared_broker::InMemoryBroker;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A connected gateway.
///
/// Share it by `Arc` or hand out [`RpcClient`] clones; there is no global
/// instance.
pub struct RpcGateway {
    config: GatewayConfig,
    session: Arc<TransportSession>,
    table: Arc<PendingCallTable>,
    client: RpcClient,
    listener_stats: Arc<ListenerStats>,
    listener_task: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl RpcGateway {
    /// Validate `config`, open the session and start the reply listener.
    ///
    /// Must be called inside a Tokio runtime. Failure is final; there is no
    /// retry.
    pub fn connect(config: &GatewayConfig, broker: &InMemoryBroker) -> Result<Self, GatewayError> {
        config.validate()?;
        let endpoint = config.broker.endpoint()?;

        let session = Arc::new(TransportSession::open_with_prefix(
            broker,
            &endpoint,
            config.reply.queue_prefix.as_deref(),
        )?);

        // Consumer exists before any request can carry our reply address
        let replies = session
            .consume_replies()
            .map_err(ConnectionError::from)?;

        let table = Arc::new(PendingCallTable::with_limit(config.limits.max_pending));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let listener = ReplyListener::new(replies, Arc::clone(&table), shutdown_rx);
        let listener_stats = listener.stats();
        let listener_task = tokio::spawn(listener.run());

        let publisher: Arc<dyn RequestPublisher> = session.clone();
        let client = RpcClient::new(
            publisher,
            Arc::clone(&table),
            config.timeouts.default,
        );

        info!(
            reply_to = %session.reply_queue(),
            default_timeout_ms = config.timeouts.default.as_millis(),
            max_pending = ?config.limits.max_pending,
            "RPC gateway connected"
        );

        Ok(Self {
            config: config.clone(),
            session,
            table,
            client,
            listener_stats,
            listener_task: Mutex::new(Some(listener_task)),
            shutdown_tx,
        })
    }

    /// A handle for making calls
    pub fn client(&self) -> RpcClient {
        self.client.clone()
    }

    /// Underlying transport session
    pub fn session(&self) -> &Arc<TransportSession> {
        &self.session
    }

    /// Reply queue of this process
    pub fn reply_to(&self) -> &str {
        self.session.reply_queue()
    }

    /// Session state
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Configuration in effect
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Calls in flight
    pub fn pending_count(&self) -> usize {
        self.table.pending_count()
    }

    /// Pending call counters
    pub fn pending_stats(&self) -> PendingStatsSnapshot {
        self.table.stats().snapshot()
    }

    /// Reply listener counters
    pub fn listener_stats(&self) -> ListenerStatsSnapshot {
        self.listener_stats.snapshot()
    }

    /// Stop the listener and close the session.
    ///
    /// Calls still in flight resolve through their own deadlines.
    pub async fn shutdown(&self) {
        info!(pending = self.table.pending_count(), "RPC gateway shutting down");

        self.shutdown_tx.send_replace(true);
        self.session.close();

        let task = self.listener_task.lock().take();
        if let Some(task) = task {
            let grace = self.config.timeouts.shutdown_grace;
            if tokio::time::timeout(grace, task).await.is_err() {
                warn!(grace_ms = grace.as_millis(), "Reply listener did not stop in time");
            }
        }

        info!("RPC gateway stopped");
    }
}

impl Drop for RpcGateway {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}
