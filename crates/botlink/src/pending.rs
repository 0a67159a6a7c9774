//! Lock-free pending request management using `scc::HashMap`.
//!
//! Every entry owns an independent timeout timer. Whichever of response,
//! error, timeout or drain reaches an entry first removes it and settles the
//! caller; everything that arrives later finds nothing and is ignored.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use serde_json::Value;
use tokio::{sync::oneshot, task::AbortHandle};
use tracing::debug;

use crate::{
    error::{BotError, BotResult},
    types::RequestId,
};

/// Receiver side handed back to the caller of a request.
pub type ResponseReceiver = oneshot::Receiver<BotResult<Value>>;

/// A request awaiting its response frame.
struct PendingRequest {
    response_tx: oneshot::Sender<BotResult<Value>>,
    created_at: Instant,
    timer: Option<AbortHandle>,
}

/// Store for in-flight requests keyed by correlation id.
#[derive(Default)]
pub struct PendingRequestTable {
    requests: scc::HashMap<RequestId, PendingRequest>,
}

impl PendingRequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request and start its timeout timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn add(self: &Arc<Self>, id: RequestId, timeout: Duration) -> BotResult<ResponseReceiver> {
        let (response_tx, response_rx) = oneshot::channel();
        let pending = PendingRequest {
            response_tx,
            created_at: Instant::now(),
            timer: None,
        };

        if self.requests.insert_sync(id.clone(), pending).is_err() {
            return Err(BotError::internal(format!("Duplicate request id {id}")));
        }

        let table = Arc::downgrade(self);
        let timer_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(table) = table.upgrade() {
                table.expire(&timer_id, timeout);
            }
        });

        let attached = self
            .requests
            .update_sync(&id, |_, pending| pending.timer = Some(timer.abort_handle()));
        if attached.is_none() {
            // Settled before the timer could be attached.
            timer.abort();
        }

        Ok(response_rx)
    }

    /// Settle a request with its response frame.
    ///
    /// Returns `false` if the id is unknown (already settled).
    pub fn resolve(&self, id: &RequestId, response: Value) -> bool {
        self.settle(id, Ok(response))
    }

    /// Settle a request with an error.
    ///
    /// Returns `false` if the id is unknown (already settled).
    pub fn reject(&self, id: &RequestId, error: BotError) -> bool {
        self.settle(id, Err(error))
    }

    /// Reject every outstanding request with a connection-closed error.
    ///
    /// Returns the number of requests drained.
    pub fn drain_all(&self, reason: &str) -> usize {
        let mut ids = Vec::new();
        self.requests.retain_sync(|id, _| {
            ids.push(id.clone());
            true
        });

        let mut drained = 0;
        for id in ids {
            if self.reject(&id, BotError::connection_closed(reason)) {
                drained += 1;
            }
        }
        drained
    }

    /// Check whether a request with this id is still waiting.
    pub fn contains(&self, id: &RequestId) -> bool {
        self.requests.update_sync(id, |_, _| ()).is_some()
    }

    /// Get the current number of pending requests.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    fn settle(&self, id: &RequestId, result: BotResult<Value>) -> bool {
        let Some((_, pending)) = self.requests.remove_sync(id) else {
            return false;
        };
        if let Some(timer) = pending.timer {
            timer.abort();
        }
        debug!(
            request_id = %id,
            ok = result.is_ok(),
            elapsed_ms = pending.created_at.elapsed().as_millis() as u64,
            "Request settled"
        );
        // Receiver may have been dropped by the caller.
        let _ = pending.response_tx.send(result);
        true
    }

    fn expire(&self, id: &RequestId, timeout: Duration) {
        let Some((_, pending)) = self.requests.remove_sync(id) else {
            return;
        };
        debug!(request_id = %id, timeout_ms = timeout.as_millis() as u64, "Request timed out");
        let _ = pending
            .response_tx
            .send(Err(BotError::timeout(timeout, id.to_string())));
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn table() -> Arc<PendingRequestTable> {
        Arc::new(PendingRequestTable::new())
    }

    #[tokio::test]
    async fn test_add_and_resolve() {
        let store = table();
        let id = RequestId::new();

        let rx = store.add(id.clone(), Duration::from_secs(10)).expect("added");
        assert_eq!(store.len(), 1);
        assert!(store.contains(&id));

        assert!(store.resolve(&id, json!({"status": "ok"})));
        assert!(store.is_empty());

        let response = rx.await.expect("sender kept").expect("resolved");
        assert_eq!(response["status"], "ok");
    }

    #[tokio::test]
    async fn test_duplicate_response_is_noop() {
        let store = table();
        let id = RequestId::new();
        let rx = store.add(id.clone(), Duration::from_secs(10)).expect("added");

        assert!(store.resolve(&id, json!({"n": 1})));
        assert!(!store.resolve(&id, json!({"n": 2})));
        assert!(!store.reject(&id, BotError::remote("late")));

        let response = rx.await.expect("sender kept").expect("first wins");
        assert_eq!(response["n"], 1);
    }

    #[tokio::test]
    async fn test_resolve_nonexistent() {
        let store = table();
        assert!(!store.resolve(&RequestId::new(), Value::Null));
        assert!(!store.reject(&RequestId::new(), BotError::remote("nope")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_rejects_and_removes() {
        let store = table();
        let id = RequestId::new();
        let rx = store
            .add(id.clone(), Duration::from_millis(50))
            .expect("added");

        let err = rx.await.expect("sender kept").expect_err("timed out");
        assert!(err.is_timeout());
        assert!(!store.contains(&id));
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_are_independent() {
        let store = table();
        let fast = RequestId::new();
        let slow = RequestId::new();
        let fast_rx = store
            .add(fast.clone(), Duration::from_millis(50))
            .expect("added");
        let slow_rx = store
            .add(slow.clone(), Duration::from_secs(5))
            .expect("added");

        let err = fast_rx.await.expect("sender kept").expect_err("timed out");
        assert!(err.is_timeout());
        assert!(store.contains(&slow));

        assert!(store.resolve(&slow, json!({"ok": true})));
        assert!(slow_rx.await.expect("sender kept").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_cancels_timer() {
        let store = table();
        let id = RequestId::new();
        let rx = store
            .add(id.clone(), Duration::from_millis(50))
            .expect("added");
        assert!(store.resolve(&id, json!({})));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.await.expect("sender kept").is_ok());
    }

    #[tokio::test]
    async fn test_drain_all() {
        let store = table();
        let receivers: Vec<_> = (0..3)
            .map(|_| {
                store
                    .add(RequestId::new(), Duration::from_secs(10))
                    .expect("added")
            })
            .collect();

        assert_eq!(store.drain_all("client disconnected"), 3);
        assert!(store.is_empty());

        for rx in receivers {
            let err = rx.await.expect("sender kept").expect_err("drained");
            assert!(err.is_connection_closed());
        }
    }
}
