//! Pending-call table for multiplexed transports.
//!
//! Transport implementations register a [`ResponseFuture`] per request id and
//! complete it when the matching response frame arrives. A background scanner
//! fails entries whose deadline has passed.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::error::RpcError;
use crate::transport::callback::CallbackPool;
use crate::transport::future::ResponseFuture;
use crate::transport::RpcResponse;

/// Request-id → future correlation for one connection.
#[derive(Debug)]
pub struct InvokeTable {
    peer: String,
    next_id: AtomicU64,
    pending: DashMap<u64, Arc<ResponseFuture>>,
    callbacks: Option<CallbackPool>,
}

impl InvokeTable {
    pub fn new(peer: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            callbacks: None,
        }
    }

    pub fn with_callbacks(mut self, pool: CallbackPool) -> Self {
        self.callbacks = Some(pool);
        self
    }

    pub fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Allocate an id and a pending future for it.
    pub fn register(&self, timeout: Duration) -> Arc<ResponseFuture> {
        let id = self.next_request_id();
        let mut future = ResponseFuture::new(id, timeout);
        if let Some(pool) = &self.callbacks {
            future = future.with_callbacks(pool.clone());
        }
        let future = Arc::new(future);
        self.pending.insert(id, future.clone());
        future
    }

    /// Resolve the future for `response.request_id`.
    ///
    /// A response carrying a server error fails the future. Returns false
    /// for unknown or already-resolved ids (late responses).
    pub fn complete(&self, response: RpcResponse) -> bool {
        let Some((_, future)) = self.pending.remove(&response.request_id) else {
            tracing::debug!(
                peer = %self.peer,
                request_id = response.request_id,
                "Dropping response for unknown request"
            );
            return false;
        };
        match &response.error {
            Some(message) => future.set_failure(RpcError::Server {
                provider: self.peer.clone(),
                message: message.clone(),
            }),
            None => future.set_success(response),
        }
    }

    pub fn fail(&self, request_id: u64, error: RpcError) -> bool {
        match self.pending.remove(&request_id) {
            Some((_, future)) => future.set_failure(error),
            None => false,
        }
    }

    /// Cancel a pending call and drop it from the table at once.
    pub fn cancel(&self, request_id: u64) -> bool {
        let future = self.pending.get(&request_id).map(|e| e.value().clone());
        let cancelled = future.is_some_and(|f| f.cancel());
        if cancelled {
            self.pending.remove(&request_id);
        }
        cancelled
    }

    /// Fail every pending call, e.g. when the connection closes.
    pub fn fail_all(&self, detail: &str) -> usize {
        let ids: Vec<u64> = self.pending.iter().map(|e| *e.key()).collect();
        let mut failed = 0;
        for id in ids {
            let closed = RpcError::ConnectionClosed {
                provider: self.peer.clone(),
                detail: detail.to_string(),
            };
            if self.fail(id, closed) {
                failed += 1;
            }
        }
        if failed > 0 {
            tracing::warn!(peer = %self.peer, failed, detail, "Failed pending calls");
        }
        failed
    }

    /// Fail expired entries and drop entries resolved elsewhere (cancelled).
    pub fn scan_timeouts(&self) -> usize {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.pending.retain(|_, future| {
            if future.is_done() {
                return false;
            }
            if future.is_expired(now) {
                expired.push(future.clone());
                return false;
            }
            true
        });
        for future in &expired {
            future.set_failure(future.timeout_error());
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Run [`scan_timeouts`](Self::scan_timeouts) every `period` until shutdown.
    pub fn spawn_scanner(
        self: &Arc<Self>,
        period: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let table = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let expired = table.scan_timeouts();
                        if expired > 0 {
                            tracing::debug!(peer = %table.peer, expired, "Expired pending calls");
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!(peer = %table.peer, "Invoke table scanner stopping");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_resolves_and_removes() {
        let table = InvokeTable::new("127.0.0.1:12200");
        let fut = table.register(Duration::from_secs(1));
        assert_eq!(table.len(), 1);
        assert!(table.complete(RpcResponse::ok(fut.request_id(), serde_json::json!(1))));
        assert!(table.is_empty());
        assert!(fut.is_success());
        assert!(!table.complete(RpcResponse::ok(fut.request_id(), serde_json::json!(2))));
    }

    #[test]
    fn test_server_error_fails_future() {
        let table = InvokeTable::new("p");
        let fut = table.register(Duration::from_secs(1));
        table.complete(RpcResponse::error(fut.request_id(), "no such method"));
        assert!(matches!(fut.try_get(), Some(Err(RpcError::Server { .. }))));
    }

    #[test]
    fn test_fail_all_closes_pending() {
        let table = InvokeTable::new("p");
        let a = table.register(Duration::from_secs(1));
        let b = table.register(Duration::from_secs(1));
        assert_ne!(a.request_id(), b.request_id());
        assert_eq!(table.fail_all("peer reset"), 2);
        assert!(a.try_get().unwrap().unwrap_err().is_connection_closed());
        assert!(b.is_done());
    }

    #[test]
    fn test_cancel_removes_entry() {
        let table = InvokeTable::new("p");
        let fut = table.register(Duration::from_secs(1));
        let pinned = table.register(Duration::from_secs(1));
        pinned.set_uncancellable();

        assert!(table.cancel(fut.request_id()));
        assert!(fut.is_cancelled());
        assert_eq!(table.len(), 1);

        assert!(!table.cancel(pinned.request_id()));
        assert!(!table.cancel(fut.request_id()));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_scan_expires_and_purges() {
        let table = InvokeTable::new("p");
        let expiring = table.register(Duration::from_millis(10));
        let cancelled = table.register(Duration::from_secs(10));
        let live = table.register(Duration::from_secs(10));
        cancelled.cancel();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(table.scan_timeouts(), 1);
        assert!(matches!(expiring.try_get(), Some(Err(RpcError::Timeout { .. }))));
        assert_eq!(table.len(), 1);
        assert!(!live.is_done());
    }
}
