//! Single-assignment response future.
//!
//! # States
//! ```text
//! pending → success | failure | cancelled
//! ```
//! Exactly one transition wins; later attempts are no-ops and never
//! re-notify listeners.
//!
//! # Listener delivery
//! - Registered before resolution: delivered once, on the callback pool
//!   (inline on the resolving task when no pool is attached)
//! - Registered after resolution: delivered once, synchronously

use parking_lot::Mutex;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::error::{Result, RpcError};
use crate::transport::callback::CallbackPool;
use crate::transport::RpcResponse;

/// Completion callback. `FnOnce` makes double delivery impossible.
pub type Listener = Box<dyn FnOnce(Result<RpcResponse>) + Send + 'static>;

#[derive(Debug, Clone)]
enum Outcome {
    Success(RpcResponse),
    Failure(RpcError),
    Cancelled,
}

struct State {
    sent_at: Option<Instant>,
    done_at: Option<Instant>,
    outcome: Option<Outcome>,
    uncancellable: bool,
    listeners: Vec<Listener>,
}

/// Correlates one request id with its eventual response.
pub struct ResponseFuture {
    request_id: u64,
    timeout: Duration,
    created_at: Instant,
    state: Mutex<State>,
    done_tx: watch::Sender<bool>,
    callbacks: Option<CallbackPool>,
}

impl ResponseFuture {
    pub fn new(request_id: u64, timeout: Duration) -> Self {
        let (done_tx, _) = watch::channel(false);
        Self {
            request_id,
            timeout,
            created_at: Instant::now(),
            state: Mutex::new(State {
                sent_at: None,
                done_at: None,
                outcome: None,
                uncancellable: false,
                listeners: Vec::new(),
            }),
            done_tx,
            callbacks: None,
        }
    }

    /// Deliver listeners registered before resolution on `pool`.
    pub fn with_callbacks(mut self, pool: CallbackPool) -> Self {
        self.callbacks = Some(pool);
        self
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn sent_at(&self) -> Option<Instant> {
        self.state.lock().sent_at
    }

    pub fn done_at(&self) -> Option<Instant> {
        self.state.lock().done_at
    }

    /// Record the moment the request was flushed to the wire. First call wins.
    pub fn mark_sent(&self) {
        let mut state = self.state.lock();
        if state.sent_at.is_none() {
            state.sent_at = Some(Instant::now());
        }
    }

    pub fn is_done(&self) -> bool {
        self.state.lock().outcome.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.state.lock().outcome, Some(Outcome::Cancelled))
    }

    pub fn is_success(&self) -> bool {
        matches!(self.state.lock().outcome, Some(Outcome::Success(_)))
    }

    /// True once past the deadline measured from creation.
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.timeout
    }

    pub fn set_success(&self, response: RpcResponse) -> bool {
        self.complete(Outcome::Success(response))
    }

    pub fn set_failure(&self, error: RpcError) -> bool {
        self.complete(Outcome::Failure(error))
    }

    /// Cancel a pending future. No-op once resolved or marked uncancellable.
    pub fn cancel(&self) -> bool {
        self.complete_if(Outcome::Cancelled, |state| !state.uncancellable)
    }

    /// Forbid cancellation. Returns false if the future was already cancelled.
    pub fn set_uncancellable(&self) -> bool {
        let mut state = self.state.lock();
        if matches!(state.outcome, Some(Outcome::Cancelled)) {
            return false;
        }
        state.uncancellable = true;
        true
    }

    /// Register a completion callback.
    pub fn add_listener<F>(&self, listener: F)
    where
        F: FnOnce(Result<RpcResponse>) + Send + 'static,
    {
        let mut state = self.state.lock();
        match &state.outcome {
            Some(outcome) => {
                let result = self.to_result(outcome);
                drop(state);
                listener(result);
            }
            None => state.listeners.push(Box::new(listener)),
        }
    }

    /// Result if already resolved.
    pub fn try_get(&self) -> Option<Result<RpcResponse>> {
        let state = self.state.lock();
        state.outcome.as_ref().map(|o| self.to_result(o))
    }

    /// Wait with the timeout the future was created with.
    pub async fn get(&self) -> Result<RpcResponse> {
        self.get_timeout(self.timeout).await
    }

    /// Wait up to `timeout`, minus the time the request spent queued before
    /// it was sent.
    pub async fn get_timeout(&self, timeout: Duration) -> Result<RpcResponse> {
        if let Some(result) = self.try_get() {
            return result;
        }

        let queued = self
            .sent_at()
            .map(|sent| sent.saturating_duration_since(self.created_at))
            .unwrap_or_default();
        let budget = timeout.saturating_sub(queued);

        let mut done_rx = self.done_tx.subscribe();
        let _ = tokio::time::timeout(budget, done_rx.wait_for(|done| *done)).await;

        match self.try_get() {
            Some(result) => result,
            None => Err(self.timeout_error_for(timeout)),
        }
    }

    /// The error observed when the future's own deadline passes.
    pub fn timeout_error(&self) -> RpcError {
        self.timeout_error_for(self.timeout)
    }

    /// The error a waiter with budget `timeout` observes.
    pub fn timeout_error_for(&self, timeout: Duration) -> RpcError {
        let now = Instant::now();
        let sent_at = self.sent_at();
        let queued = sent_at
            .map(|sent| sent.saturating_duration_since(self.created_at))
            .unwrap_or_default();
        let waited = now.saturating_duration_since(sent_at.unwrap_or(self.created_at));
        RpcError::Timeout {
            request_id: self.request_id,
            sent: sent_at.is_some(),
            timeout_ms: timeout.as_millis() as u64,
            queued_ms: queued.as_millis() as u64,
            waited_ms: waited.as_millis() as u64,
        }
    }

    fn complete(&self, outcome: Outcome) -> bool {
        self.complete_if(outcome, |_| true)
    }

    fn complete_if(&self, outcome: Outcome, allowed: impl FnOnce(&State) -> bool) -> bool {
        let (listeners, result) = {
            let mut state = self.state.lock();
            if state.outcome.is_some() || !allowed(&state) {
                return false;
            }
            let result = self.to_result(&outcome);
            state.outcome = Some(outcome);
            state.done_at = Some(Instant::now());
            (std::mem::take(&mut state.listeners), result)
        };

        self.done_tx.send_replace(true);

        if let Err(e) = &result {
            tracing::debug!(request_id = self.request_id, error = %e, "Response future failed");
        }

        for listener in listeners {
            let result = result.clone();
            match &self.callbacks {
                Some(pool) => pool.execute(move || listener(result)),
                None => listener(result),
            }
        }
        true
    }

    fn to_result(&self, outcome: &Outcome) -> Result<RpcResponse> {
        match outcome {
            Outcome::Success(resp) => Ok(resp.clone()),
            Outcome::Failure(err) => Err(err.clone()),
            Outcome::Cancelled => Err(RpcError::Cancelled(self.request_id)),
        }
    }
}

impl fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ResponseFuture")
            .field("request_id", &self.request_id)
            .field("timeout", &self.timeout)
            .field("sent", &state.sent_at.is_some())
            .field("outcome", &state.outcome)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_first_resolution_wins() {
        let fut = ResponseFuture::new(1, Duration::from_secs(1));
        assert!(fut.set_success(RpcResponse::ok(1, serde_json::json!("a"))));
        assert!(!fut.set_failure(RpcError::Local("late".into())));
        assert!(!fut.cancel());
        assert!(fut.is_success());
        assert!(fut.try_get().unwrap().is_ok());
    }

    #[test]
    fn test_listener_before_resolution_runs_once() {
        let fut = ResponseFuture::new(2, Duration::from_secs(1));
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        fut.add_listener(move |res| {
            assert!(res.is_err());
            h.fetch_add(1, Ordering::SeqCst);
        });
        fut.set_failure(RpcError::Transport("reset".into()));
        fut.set_success(RpcResponse::default());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_after_resolution_runs_synchronously() {
        let fut = ResponseFuture::new(3, Duration::from_secs(1));
        fut.set_success(RpcResponse::ok(3, serde_json::json!(1)));
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        fut.add_listener(move |res| {
            assert!(res.is_ok());
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_pending() {
        let fut = ResponseFuture::new(4, Duration::from_secs(1));
        assert!(fut.cancel());
        assert!(fut.is_cancelled());
        assert!(matches!(fut.try_get(), Some(Err(RpcError::Cancelled(4)))));
        assert!(!fut.set_success(RpcResponse::default()));
    }

    #[test]
    fn test_uncancellable() {
        let fut = ResponseFuture::new(5, Duration::from_secs(1));
        assert!(fut.set_uncancellable());
        assert!(!fut.cancel());
        assert!(!fut.is_done());
    }

    #[tokio::test]
    async fn test_get_waits_for_resolution() {
        let fut = Arc::new(ResponseFuture::new(6, Duration::from_secs(5)));
        let resolver = fut.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            resolver.set_success(RpcResponse::ok(6, serde_json::json!("pong")));
        });
        let resp = fut.get().await.unwrap();
        assert_eq!(resp.payload, Some(serde_json::json!("pong")));
    }

    #[tokio::test]
    async fn test_get_times_out_unsent() {
        let fut = ResponseFuture::new(7, Duration::from_millis(30));
        let err = fut.get().await.unwrap_err();
        match err {
            RpcError::Timeout { sent, request_id, .. } => {
                assert!(!sent);
                assert_eq!(request_id, 7);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_get_times_out_sent() {
        let fut = ResponseFuture::new(8, Duration::from_millis(30));
        fut.mark_sent();
        let err = fut.get().await.unwrap_err();
        assert!(matches!(err, RpcError::Timeout { sent: true, .. }));
        assert!(!fut.is_done());
    }

    #[tokio::test]
    async fn test_timeout_error_reports_callers_budget() {
        let fut = ResponseFuture::new(10, Duration::from_secs(5));
        fut.mark_sent();
        match fut.get_timeout(Duration::from_millis(20)).await.unwrap_err() {
            RpcError::Timeout { timeout_ms, sent, .. } => {
                assert_eq!(timeout_ms, 20);
                assert!(sent);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(fut.timeout_error(), RpcError::Timeout { timeout_ms: 5000, .. }));
    }

    #[tokio::test]
    async fn test_queue_delay_is_taken_from_the_budget() {
        let fut = ResponseFuture::new(11, Duration::from_secs(5));
        tokio::time::sleep(Duration::from_millis(80)).await;
        fut.mark_sent();

        let started = Instant::now();
        let err = fut.get_timeout(Duration::from_millis(150)).await.unwrap_err();
        let waited = started.elapsed();
        assert!(waited < Duration::from_millis(120), "waited {:?}", waited);
        match err {
            RpcError::Timeout { queued_ms, sent, .. } => {
                assert!(sent);
                assert!(queued_ms >= 80, "queued {}ms", queued_ms);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cancel_loses_to_uncancellable_under_contention() {
        for id in 0..200 {
            let fut = Arc::new(ResponseFuture::new(id, Duration::from_secs(1)));
            let guard = fut.clone();
            let marker = std::thread::spawn(move || guard.set_uncancellable());
            let cancelled = fut.cancel();
            let marked = marker.join().unwrap();
            // Exactly one side wins
            assert_ne!(cancelled, marked);
            assert_eq!(fut.is_cancelled(), cancelled);
        }
    }

    #[tokio::test]
    async fn test_listener_delivered_on_pool() {
        let pool = CallbackPool::from_current(4).unwrap();
        let fut = ResponseFuture::new(9, Duration::from_secs(1)).with_callbacks(pool);
        let (tx, rx) = tokio::sync::oneshot::channel();
        fut.add_listener(move |res| {
            let _ = tx.send(res.is_ok());
        });
        fut.set_success(RpcResponse::default());
        assert!(rx.await.unwrap());
    }
}
