//! Shared utilities for integration tests: a scriptable in-memory transport.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rpc_cluster::config::ConsumerConfig;
use rpc_cluster::error::{Result, RpcError};
use rpc_cluster::holder::AvailabilityListener;
use rpc_cluster::provider::ProviderInfo;
use rpc_cluster::transport::{
    CallbackPool, ResponseFuture, RpcRequest, RpcResponse, Transport, TransportConfig, TransportFactory,
};

pub const SERVICE: &str = "com.acme.EchoService";

/// Config with both loops disabled and a short double-check, so tests drive ticks by hand.
pub fn test_config() -> ConsumerConfig {
    let mut config = ConsumerConfig::new(SERVICE);
    config.heartbeat.period_ms = 0;
    config.reconnect.period_ms = 0;
    config.connection.connect_timeout_ms = 500;
    config.connection.disconnect_timeout_ms = 200;
    config.connection.double_check_delay_ms = 20;
    config.connection.init_slack_ms = 200;
    config.invoke.timeout_ms = 1000;
    config
}

pub fn provider(port: u16) -> ProviderInfo {
    ProviderInfo::new("bolt", "127.0.0.1", port)
}

pub fn addr(port: u16) -> String {
    format!("127.0.0.1:{}", port)
}

/// Transport whose behavior is flipped through atomics and a reply script.
#[derive(Debug)]
pub struct MockTransport {
    address: String,
    open: Arc<AtomicBool>,
    available: AtomicBool,
    fail_connect: AtomicBool,
    connect_delay: Mutex<Duration>,
    close_after_connect: Mutex<Option<Duration>>,
    fail_heartbeat: AtomicBool,
    heartbeat_delay: Mutex<Duration>,
    send_delay: Mutex<Duration>,
    replies: Mutex<VecDeque<Result<Option<RpcResponse>>>>,
    requests: Mutex<Vec<RpcRequest>>,
    callbacks: Option<CallbackPool>,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub sends: AtomicUsize,
    pub heartbeats: AtomicUsize,
}

impl MockTransport {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            open: Arc::new(AtomicBool::new(false)),
            available: AtomicBool::new(true),
            fail_connect: AtomicBool::new(false),
            connect_delay: Mutex::new(Duration::ZERO),
            close_after_connect: Mutex::new(None),
            fail_heartbeat: AtomicBool::new(false),
            heartbeat_delay: Mutex::new(Duration::ZERO),
            send_delay: Mutex::new(Duration::ZERO),
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            callbacks: None,
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            sends: AtomicUsize::new(0),
            heartbeats: AtomicUsize::new(0),
        }
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = delay;
    }

    /// Connect succeeds but the connection drops `after` it opened.
    pub fn set_close_after_connect(&self, after: Option<Duration>) {
        *self.close_after_connect.lock() = after;
    }

    pub fn set_fail_heartbeat(&self, fail: bool) {
        self.fail_heartbeat.store(fail, Ordering::SeqCst);
    }

    /// Heartbeats answer only after `delay`.
    pub fn set_heartbeat_delay(&self, delay: Duration) {
        *self.heartbeat_delay.lock() = delay;
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_send_delay(&self, delay: Duration) {
        *self.send_delay.lock() = delay;
    }

    /// Simulate the peer closing the connection.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    /// Queue the outcome of the next `send`. Unscripted sends echo the address.
    pub fn push_reply(&self, reply: Result<Option<RpcResponse>>) {
        self.replies.lock().push_back(reply);
    }

    pub fn requests(&self) -> Vec<RpcRequest> {
        self.requests.lock().clone()
    }

    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> Result<Option<RpcResponse>> {
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Some(RpcResponse::ok(0, serde_json::json!(self.address)))))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(RpcError::Transport(format!("connection refused: {}", self.address)));
        }
        self.open.store(true, Ordering::SeqCst);
        let close_after = *self.close_after_connect.lock();
        if let Some(after) = close_after {
            let open = self.open.clone();
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                open.store(false, Ordering::SeqCst);
            });
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn is_available(&self) -> bool {
        self.is_open() && self.available.load(Ordering::SeqCst)
    }

    async fn send(&self, request: &RpcRequest, _timeout: Duration) -> Result<Option<RpcResponse>> {
        if request.is_heartbeat() {
            self.heartbeats.fetch_add(1, Ordering::SeqCst);
            let delay = *self.heartbeat_delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if self.fail_heartbeat.load(Ordering::SeqCst) {
                return Err(RpcError::Transport("heartbeat lost".into()));
            }
            return Ok(Some(RpcResponse::default()));
        }

        self.sends.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        let delay = *self.send_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.next_reply()
    }

    async fn async_send(&self, request: &RpcRequest, timeout: Duration) -> Result<Arc<ResponseFuture>> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        let id = self.sends.load(Ordering::SeqCst) as u64;
        let mut future = ResponseFuture::new(id, timeout);
        if let Some(pool) = &self.callbacks {
            future = future.with_callbacks(pool.clone());
        }
        let future = Arc::new(future);
        future.mark_sent();

        let reply = self.next_reply();
        let delay = *self.send_delay.lock();
        let pending = future.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match reply {
                Ok(Some(resp)) => pending.set_success(RpcResponse { request_id: id, ..resp }),
                Ok(None) => pending.set_success(RpcResponse { request_id: id, ..Default::default() }),
                Err(e) => pending.set_failure(e),
            };
        });
        Ok(future)
    }

    async fn one_way_send(&self, request: &RpcRequest, _timeout: Duration) -> Result<()> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        Ok(())
    }

    fn remote_address(&self) -> Option<SocketAddr> {
        self.address.parse().ok()
    }

    fn local_address(&self) -> Option<SocketAddr> {
        "127.0.0.1:50000".parse().ok()
    }
}

/// Hands out one [`MockTransport`] per provider address.
///
/// Tests script a transport through [`MockTransportFactory::transport`]
/// before or after the client creates it; both see the same instance.
#[derive(Debug, Default)]
pub struct MockTransportFactory {
    transports: Mutex<HashMap<String, Arc<MockTransport>>>,
    pub creates: AtomicUsize,
}

impl MockTransportFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn transport(&self, address: &str) -> Arc<MockTransport> {
        self.transports
            .lock()
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(MockTransport::new(address)))
            .clone()
    }

    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(&self, provider: &ProviderInfo, config: &TransportConfig) -> Arc<dyn Transport> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.transports
            .lock()
            .entry(provider.address())
            .or_insert_with(|| {
                let mut transport = MockTransport::new(provider.address());
                transport.callbacks = config.callbacks.clone();
                Arc::new(transport)
            })
            .clone()
    }
}

/// Records availability edges in order.
#[derive(Debug, Default)]
pub struct EdgeRecorder {
    events: Mutex<Vec<&'static str>>,
}

impl EdgeRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().clone()
    }
}

impl AvailabilityListener for EdgeRecorder {
    fn on_available(&self, _service: &str) {
        self.events.lock().push("available");
    }

    fn on_unavailable(&self, _service: &str) {
        self.events.lock().push("unavailable");
    }
}
