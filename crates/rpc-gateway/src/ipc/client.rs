//! RPC Client - request/reply over the shared session.
//!
//! A call registers a pending entry (arming its deadline), publishes the
//! request, then waits on the entry's completion slot. Many calls share one
//! publisher and one reply queue.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::error::CallError;
use crate::domain::pending::PendingCallTable;
use crate::domain::reply::interpret_reply;
use crate::ports::outbound::{OutboundRequest, RequestPublisher};

/// Cheap to clone; clones share the table and the publisher.
#[derive(Clone)]
pub struct RpcClient {
    publisher: Arc<dyn RequestPublisher>,
    table: Arc<PendingCallTable>,
    default_timeout: Duration,
}

impl RpcClient {
    pub fn new(
        publisher: Arc<dyn RequestPublisher>,
        table: Arc<PendingCallTable>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            publisher,
            table,
            default_timeout,
        }
    }

    /// Send `message` to `destination` and wait up to `timeout` for the reply.
    ///
    /// A reply whose body reports a failure becomes [`CallError::Remote`].
    pub async fn call<M>(
        &self,
        destination: &str,
        message: &M,
        timeout: Duration,
    ) -> Result<Value, CallError>
    where
        M: Serialize + ?Sized,
    {
        let body = self.call_raw(destination, message, timeout).await?;
        interpret_reply(body)
    }

    /// [`call`](Self::call) with the configured default timeout.
    pub async fn call_default<M>(&self, destination: &str, message: &M) -> Result<Value, CallError>
    where
        M: Serialize + ?Sized,
    {
        self.call(destination, message, self.default_timeout).await
    }

    /// [`call`](Self::call), deserializing the successful reply into `R`.
    pub async fn call_typed<M, R>(
        &self,
        destination: &str,
        message: &M,
        timeout: Duration,
    ) -> Result<R, CallError>
    where
        M: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let body = self.call(destination, message, timeout).await?;
        serde_json::from_value(body).map_err(|e| CallError::Serialization(e.to_string()))
    }

    /// Send and wait, returning the reply body as-is.
    pub async fn call_raw<M>(
        &self,
        destination: &str,
        message: &M,
        timeout: Duration,
    ) -> Result<Value, CallError>
    where
        M: Serialize + ?Sized,
    {
        // Serialize first so a bad message never occupies a table slot
        let body = serde_json::to_vec(message).map_err(|e| CallError::Serialization(e.to_string()))?;

        let (correlation_id, completion) = self.table.register(destination, timeout)?;

        let request = OutboundRequest {
            correlation_id,
            reply_to: self.publisher.reply_to().to_string(),
            body: Bytes::from(body),
        };

        if let Err(error) = self.publisher.publish(destination, request).await {
            self.table.abandon(&correlation_id);
            warn!(
                correlation_id = %correlation_id,
                destination = destination,
                error = %error,
                "Publish failed, call abandoned"
            );
            return Err(CallError::Transport(error));
        }

        debug!(
            correlation_id = %correlation_id,
            destination = destination,
            "Request published, awaiting reply"
        );

        match completion.await {
            Ok(outcome) => outcome,
            // Only reachable if the slot was dropped unresolved; report it as
            // the deadline the caller asked for
            Err(_) => Err(CallError::Timeout {
                destination: destination.to_string(),
                timeout,
            }),
        }
    }

    /// Calls currently waiting for a reply
    pub fn pending_count(&self) -> usize {
        self.table.pending_count()
    }

    /// Timeout used by [`call_default`](Self::call_default)
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Reply address stamped on requests
    pub fn reply_to(&self) -> &str {
        self.publisher.reply_to()
    }

    /// Shared pending call table
    pub fn table(&self) -> &Arc<PendingCallTable> {
        &self.table
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("reply_to", &self.publisher.reply_to())
            .field("pending", &self.table.pending_count())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::TransportError;
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::json;
    use tokio::sync::mpsc;

    /// Publisher that hands requests to the test instead of a broker
    struct ChannelPublisher {
        requests: mpsc::UnboundedSender<(String, OutboundRequest)>,
    }

    #[async_trait]
    impl RequestPublisher for ChannelPublisher {
        fn reply_to(&self) -> &str {
            "amq.gen-test"
        }

        async fn publish(
            &self,
            destination: &str,
            request: OutboundRequest,
        ) -> Result<(), TransportError> {
            self.requests
                .send((destination.to_string(), request))
                .map_err(|_| TransportError::SessionClosed)
        }
    }

    struct FailingPublisher;

    #[async_trait]
    impl RequestPublisher for FailingPublisher {
        fn reply_to(&self) -> &str {
            "amq.gen-test"
        }

        async fn publish(&self, _: &str, _: OutboundRequest) -> Result<(), TransportError> {
            Err(TransportError::SessionClosed)
        }
    }

    fn client() -> (RpcClient, mpsc::UnboundedReceiver<(String, OutboundRequest)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = RpcClient::new(
            Arc::new(ChannelPublisher { requests: tx }),
            Arc::new(PendingCallTable::new()),
            Duration::from_secs(10),
        );
        (client, rx)
    }

    /// Answer the next request with `reply`.
    fn respond_next(
        client: &RpcClient,
        mut requests: mpsc::UnboundedReceiver<(String, OutboundRequest)>,
        reply: Value,
    ) -> tokio::task::JoinHandle<(String, OutboundRequest)> {
        let table = Arc::clone(client.table());
        tokio::spawn(async move {
            let (destination, request) = requests.recv().await.unwrap();
            table.complete(&request.correlation_id, reply);
            (destination, request)
        })
    }

    #[tokio::test]
    async fn test_call_returns_reply() {
        let (client, requests) = client();
        let responder = respond_next(&client, requests, json!({"balance": 250}));

        let reply = client
            .call("bank", &json!({"op": "balance", "account": "A-1"}), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(reply, json!({"balance": 250}));
        let (destination, request) = responder.await.unwrap();
        assert_eq!(destination, "bank");
        assert_eq!(request.reply_to, "amq.gen-test");
        let sent: Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(sent["account"], "A-1");
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_failure_becomes_error() {
        let (client, requests) = client();
        respond_next(&client, requests, json!({"error": {"code": 3, "message": "frozen"}}));

        let err = client
            .call("bank", &json!({}), Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, CallError::Remote { code: Some(3), .. }));
    }

    #[tokio::test]
    async fn test_call_raw_skips_status_rule() {
        let (client, requests) = client();
        respond_next(&client, requests, json!({"ok": false}));

        let body = client
            .call_raw("bank", &json!({}), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(body, json!({"ok": false}));
    }

    #[tokio::test]
    async fn test_call_typed() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Balance {
            balance: u64,
        }

        let (client, requests) = client();
        respond_next(&client, requests, json!({"balance": 7}));

        let balance: Balance = client
            .call_typed("bank", &json!({}), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(balance, Balance { balance: 7 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_times_out_and_cleans_up() {
        let (client, _requests) = client();

        let err = client
            .call("dni", &json!({"dni": "12345678"}), Duration::from_millis(300))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            CallError::Timeout {
                destination: "dni".into(),
                timeout: Duration::from_millis(300),
            }
        );
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_default_uses_configured_timeout() {
        let (client, _requests) = client();
        let started = tokio::time::Instant::now();

        let err = client.call_default("bank", &json!({})).await.unwrap_err();

        assert!(err.is_timeout());
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(10));
        assert!(waited < Duration::from_secs(11));
    }

    #[tokio::test]
    async fn test_publish_failure_leaves_no_entry() {
        let table = Arc::new(PendingCallTable::new());
        let client = RpcClient::new(
            Arc::new(FailingPublisher),
            Arc::clone(&table),
            Duration::from_secs(10),
        );

        let err = client
            .call("bank", &json!({}), Duration::from_secs(5))
            .await
            .unwrap_err();

        assert_eq!(err, CallError::Transport(TransportError::SessionClosed));
        assert_eq!(table.pending_count(), 0);
        assert_eq!(table.stats().snapshot().publish_failed, 1);
    }

    #[tokio::test]
    async fn test_unserializable_message() {
        let (client, _requests) = client();
        let mut bad = std::collections::HashMap::new();
        bad.insert(vec![1u8], "keys must be strings");

        let err = client
            .call("bank", &bad, Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, CallError::Serialization(_)));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_calls_get_distinct_ids() {
        let (client, mut requests) = client();
        let table = Arc::clone(client.table());

        // Echo each request body back as its reply
        tokio::spawn(async move {
            while let Some((_, request)) = requests.recv().await {
                let body: Value = serde_json::from_slice(&request.body).unwrap();
                table.complete(&request.correlation_id, body);
            }
        });

        let calls = (0..100).map(|i| {
            let client = client.clone();
            async move {
                client
                    .call("echo", &json!({"n": i}), Duration::from_secs(5))
                    .await
            }
        });

        let replies = futures::future::join_all(calls).await;
        for (i, reply) in replies.into_iter().enumerate() {
            assert_eq!(reply.unwrap(), json!({"n": i}));
        }

        let snapshot = client.table().stats().snapshot();
        assert_eq!(snapshot.registered, 100);
        assert_eq!(snapshot.completed, 100);
    }
}
