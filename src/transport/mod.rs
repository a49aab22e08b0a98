//! Transport contract and async response correlation.
//!
//! # Data Flow
//! ```text
//! Cluster picks a Connection (provider + transport)
//!     → Transport::send        (sync: await the response)
//!     → Transport::async_send  (future: table.rs registers a ResponseFuture)
//!     → Transport::one_way_send
//!
//! Response arrives / connection closes / deadline passes
//!     → table.rs removes the pending entry
//!     → future.rs resolves exactly once
//!     → callback.rs delivers listeners on the owned callback pool
//! ```
//!
//! # Design Decisions
//! - Wire framing and serialization belong to the transport implementation
//! - A transport is shared by concurrent callers; `send` must be thread-safe
//! - `send` may return `Ok(None)`; the cluster turns that into a retryable error

pub mod callback;
pub mod future;
pub mod table;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, RpcError};
use crate::provider::ProviderInfo;

pub use callback::CallbackPool;
pub use future::{Listener, ResponseFuture};
pub use table::InvokeTable;

/// Method name carried by heartbeat probes.
pub const HEARTBEAT_METHOD: &str = "$heartbeat";

/// How a call waits for its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvokeType {
    /// Await the response.
    #[default]
    Sync,
    /// Return a [`ResponseFuture`] once the request is handed off.
    Future,
    /// Fire and forget.
    Oneway,
}

/// Outgoing call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub service: String,
    pub method: String,
    pub args: Vec<serde_json::Value>,
    /// Request properties sent along with the call (negotiation hints etc).
    pub props: HashMap<String, String>,
}

impl RpcRequest {
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            args: Vec::new(),
            props: HashMap::new(),
        }
    }

    pub fn with_arg(mut self, arg: serde_json::Value) -> Self {
        self.args.push(arg);
        self
    }

    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    /// Lightweight liveness probe for `service`.
    pub fn heartbeat(service: impl Into<String>) -> Self {
        Self::new(service, HEARTBEAT_METHOD)
    }

    pub fn is_heartbeat(&self) -> bool {
        self.method == HEARTBEAT_METHOD
    }
}

/// Incoming response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub request_id: u64,
    /// Application result; `None` for void methods.
    pub payload: Option<serde_json::Value>,
    /// Framework-level error reported by the server.
    pub error: Option<String>,
    pub props: HashMap<String, String>,
}

impl RpcResponse {
    pub fn ok(request_id: u64, payload: serde_json::Value) -> Self {
        Self {
            request_id,
            payload: Some(payload),
            ..Default::default()
        }
    }

    pub fn error(request_id: u64, message: impl Into<String>) -> Self {
        Self {
            request_id,
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Settings handed to the factory when a transport is created.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    pub invoke_timeout: Duration,
    /// Physical connections the transport may open to one provider.
    pub connections_per_provider: usize,
    /// Pool that futures created by the transport deliver listeners on.
    pub callbacks: Option<CallbackPool>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(3000),
            invoke_timeout: Duration::from_millis(3000),
            connections_per_provider: 1,
            callbacks: None,
        }
    }
}

/// Network handle to one provider.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Open the connection.
    async fn connect(&self) -> Result<()>;

    /// Close the connection. Idempotent.
    async fn disconnect(&self);

    /// True while the underlying connection is established.
    fn is_open(&self) -> bool;

    /// True if the transport can take new calls right now.
    fn is_available(&self) -> bool;

    /// Send and wait for the response. `Ok(None)` means no response was produced.
    async fn send(&self, request: &RpcRequest, timeout: Duration) -> Result<Option<RpcResponse>>;

    /// Hand the request off and return the correlation future.
    async fn async_send(&self, request: &RpcRequest, timeout: Duration) -> Result<Arc<ResponseFuture>>;

    /// Send without waiting for any response.
    async fn one_way_send(&self, request: &RpcRequest, timeout: Duration) -> Result<()>;

    fn remote_address(&self) -> Option<SocketAddr>;

    fn local_address(&self) -> Option<SocketAddr>;

    /// Liveness probe used by the heartbeat loop.
    async fn heartbeat(&self, service: &str, timeout: Duration) -> Result<()> {
        match self.send(&RpcRequest::heartbeat(service), timeout).await? {
            Some(resp) if resp.is_error() => Err(RpcError::Transport(format!(
                "heartbeat rejected: {}",
                resp.error.unwrap_or_default()
            ))),
            _ => Ok(()),
        }
    }
}

/// Builds transports for providers.
pub trait TransportFactory: Send + Sync + Debug {
    fn create(&self, provider: &ProviderInfo, config: &TransportConfig) -> Arc<dyn Transport>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_request() {
        let req = RpcRequest::heartbeat("com.acme.Echo");
        assert!(req.is_heartbeat());
        assert!(!RpcRequest::new("com.acme.Echo", "echo").is_heartbeat());
    }

    #[test]
    fn test_invoke_type_serde() {
        let t: InvokeType = serde_json::from_str("\"oneway\"").unwrap();
        assert_eq!(t, InvokeType::Oneway);
        assert_eq!(InvokeType::default(), InvokeType::Sync);
    }
}
