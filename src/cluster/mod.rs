//! Cluster invocation: provider selection plus fault-tolerance policy.
//!
//! # Data Flow
//! ```text
//! Client::invoke(request, ctx)
//!     → strategy admission (resettable: reject while resetting)
//!     → for attempt in 1..=strategy.max_attempts(retries):
//!         → strategy.select (sticky → alive → routers → minus tried → load balancer)
//!         → invoke.rs envelope (negotiation props, timer, send, stats)
//!         → ok: return
//!         → retryable error and attempts left: remember provider, retry
//!         → otherwise: Invocation error { tried, cause }
//! ```
//!
//! # Design Decisions
//! - One orchestration loop; strategies only answer "how many attempts",
//!   "is this retryable" and, for pinpoint, "which provider"
//! - Per-call state lives in `CallContext` and locals, never in statics
//! - A provider whose transport is unavailable at selection time is demoted
//!   and selection continues with the remaining candidates

pub mod context;
pub mod failfast;
pub mod failover;
pub mod invoke;
pub mod pinpoint;
pub mod resettable;
pub mod stats;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::{ClusterKind, ConsumerConfig};
use crate::error::{Result, RpcError};
use crate::holder::{Connection, ConnectionHolder};
use crate::load_balancer::LoadBalancer;
use crate::observability::metrics;
use crate::provider::ProviderInfo;
use crate::routing::RouterChain;
use crate::transport::{InvokeType, ResponseFuture, RpcRequest, RpcResponse};

pub use context::CallContext;
pub use failfast::FailFast;
pub use failover::Failover;
pub use pinpoint::Pinpoint;
pub use resettable::Resettable;
pub use stats::{CallStats, CallStatsEntry};

/// What an invocation produced, by invoke type.
#[derive(Debug, Clone)]
pub enum InvokeResult {
    Response(RpcResponse),
    Future(Arc<ResponseFuture>),
    Sent,
}

impl InvokeResult {
    pub fn into_response(self) -> Option<RpcResponse> {
        match self {
            InvokeResult::Response(resp) => Some(resp),
            _ => None,
        }
    }

    pub fn into_future(self) -> Option<Arc<ResponseFuture>> {
        match self {
            InvokeResult::Future(future) => Some(future),
            _ => None,
        }
    }
}

/// Fault-tolerance policy of a cluster.
pub trait ClusterStrategy: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Total attempts for a call configured with `retries`.
    fn max_attempts(&self, retries: u32) -> u32;

    /// Whether a failed attempt may be followed by another.
    fn is_retryable(&self, error: &RpcError) -> bool;

    fn select(
        &self,
        cluster: &Cluster,
        request: &RpcRequest,
        ctx: &CallContext,
        tried: &[Arc<ProviderInfo>],
    ) -> Result<Connection> {
        cluster.select_connection(request, ctx, tried)
    }

    /// Gate held shared by calls and exclusively by a transport reset.
    fn reset_gate(&self) -> Option<&Arc<RwLock<()>>> {
        None
    }
}

pub fn build_strategy(kind: ClusterKind) -> Arc<dyn ClusterStrategy> {
    match kind {
        ClusterKind::Failfast => Arc::new(FailFast),
        ClusterKind::Failover => Arc::new(Failover),
        ClusterKind::Pinpoint => Arc::new(Pinpoint),
        ClusterKind::Resettable => Arc::new(Resettable::new()),
    }
}

/// Shared orchestration over a holder, a balancer, routers and a strategy.
#[derive(Debug)]
pub struct Cluster {
    service: String,
    config: Arc<ArcSwap<ConsumerConfig>>,
    holder: Arc<ConnectionHolder>,
    load_balancer: Arc<dyn LoadBalancer>,
    routers: ArcSwap<RouterChain>,
    strategy: Arc<dyn ClusterStrategy>,
    stats: Arc<CallStats>,
    sticky: Mutex<Option<Arc<ProviderInfo>>>,
}

impl Cluster {
    pub fn new(
        config: Arc<ArcSwap<ConsumerConfig>>,
        holder: Arc<ConnectionHolder>,
        load_balancer: Arc<dyn LoadBalancer>,
        strategy: Arc<dyn ClusterStrategy>,
        stats: Arc<CallStats>,
    ) -> Self {
        let current = config.load();
        let service = current.interface_id.clone();
        let routers = ArcSwap::from_pointee(RouterChain::from_rules(&current.routers));
        drop(current);
        Self {
            service,
            config,
            holder,
            load_balancer,
            routers,
            strategy,
            stats,
            sticky: Mutex::new(None),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn holder(&self) -> &Arc<ConnectionHolder> {
        &self.holder
    }

    pub fn stats(&self) -> &Arc<CallStats> {
        &self.stats
    }

    pub fn strategy(&self) -> &Arc<dyn ClusterStrategy> {
        &self.strategy
    }

    pub fn load_balancer(&self) -> &Arc<dyn LoadBalancer> {
        &self.load_balancer
    }

    pub fn config(&self) -> Arc<ConsumerConfig> {
        self.config.load_full()
    }

    /// Rebuild the router chain from the current config.
    pub fn reload_routers(&self) {
        let config = self.config.load();
        self.routers.store(Arc::new(RouterChain::from_rules(&config.routers)));
    }

    pub fn set_routers(&self, chain: RouterChain) {
        self.routers.store(Arc::new(chain));
    }

    /// Provider of the sticky slot, if any.
    pub fn sticky_provider(&self) -> Option<Arc<ProviderInfo>> {
        self.sticky.lock().clone()
    }

    /// Run one call through the strategy.
    pub async fn invoke(
        &self,
        request: &RpcRequest,
        ctx: &mut CallContext,
        invoke_type: InvokeType,
    ) -> Result<InvokeResult> {
        let _admission = match self.strategy.reset_gate() {
            Some(gate) => Some(
                gate.clone()
                    .try_read_owned()
                    .map_err(|_| RpcError::Resetting(self.service.clone()))?,
            ),
            None => None,
        };

        let config = self.config.load_full();
        let method = request.method.as_str();
        let timeout = config.method_timeout(method);
        let max_attempts = self.strategy.max_attempts(config.method_retries(method)).max(1);

        let mut tried: Vec<Arc<ProviderInfo>> = Vec::new();
        let mut last_error: Option<RpcError> = None;

        for attempt in 1..=max_attempts {
            ctx.attempts = attempt;
            let conn = match self.strategy.select(self, request, ctx, &tried) {
                Ok(conn) => conn,
                Err(e) => {
                    return Err(match last_error {
                        Some(cause) => self.enrich(method, attempt - 1, &tried, cause),
                        None => e,
                    });
                }
            };
            tried.push(conn.provider.clone());

            match invoke::invoke_once(self, &conn, request, ctx, invoke_type, timeout).await {
                Ok(result) => {
                    if attempt > 1 {
                        tracing::info!(
                            service = %self.service,
                            method,
                            trace_id = %ctx.trace_id,
                            attempt,
                            provider = %conn.provider,
                            "Call succeeded after retry"
                        );
                    }
                    return Ok(result);
                }
                Err(e) => {
                    if attempt == max_attempts || !self.strategy.is_retryable(&e) {
                        return Err(self.enrich(method, attempt, &tried, e));
                    }
                    tracing::warn!(
                        service = %self.service,
                        method,
                        trace_id = %ctx.trace_id,
                        attempt,
                        max_attempts,
                        provider = %conn.provider,
                        error = %e,
                        "Call failed, retrying on another provider"
                    );
                    metrics::record_retry(&self.service);
                    last_error = Some(e);
                }
            }
        }

        let cause = last_error.unwrap_or_else(|| RpcError::NoAliveProvider {
            service: self.service.clone(),
            detail: "no attempt was made".to_string(),
        });
        Err(self.enrich(method, max_attempts, &tried, cause))
    }

    /// Shared selection: sticky, then routed alive candidates minus `tried`.
    pub fn select_connection(
        &self,
        request: &RpcRequest,
        ctx: &CallContext,
        tried: &[Arc<ProviderInfo>],
    ) -> Result<Connection> {
        let config = self.config.load();

        if config.sticky {
            if let Some(conn) = self.sticky_connection(&config, tried) {
                return Ok(conn);
            }
        }

        let alive = self.holder.alive_providers();
        let alive_count = alive.len();
        let routed = self.routers.load().route(request, ctx, alive);
        let routed_count = routed.len();
        let mut candidates: Vec<Arc<ProviderInfo>> =
            routed.into_iter().filter(|p| !tried.contains(p)).collect();

        loop {
            let Some(provider) = self.load_balancer.select(request, &candidates) else {
                return Err(RpcError::NoAliveProvider {
                    service: self.service.clone(),
                    detail: format!(
                        "{} alive, {} after routing, {} already tried",
                        alive_count,
                        routed_count,
                        tried.len()
                    ),
                });
            };

            match self.holder.connection(&provider) {
                Some(conn) if conn.transport.is_available() => {
                    if config.sticky {
                        *self.sticky.lock() = Some(provider);
                    }
                    return Ok(conn);
                }
                Some(_) => {
                    self.holder.demote_to_retry(&provider, "transport unavailable at selection");
                }
                None => {
                    tracing::debug!(service = %self.service, provider = %provider, "Selected provider left alive set");
                }
            }
            candidates.retain(|c| c != &provider);
        }
    }

    /// Swap every transport for a new provider list while calls are held off.
    pub async fn reset(&self, providers: Vec<ProviderInfo>) -> usize {
        let _exclusive = match self.strategy.reset_gate() {
            Some(gate) => Some(gate.clone().write_owned().await),
            None => None,
        };
        tracing::info!(service = %self.service, count = providers.len(), "Resetting transports");
        *self.sticky.lock() = None;
        self.holder.remove_all().await;
        self.holder.add_providers(providers).await
    }

    fn sticky_connection(&self, config: &ConsumerConfig, tried: &[Arc<ProviderInfo>]) -> Option<Connection> {
        let provider = self.sticky.lock().clone()?;
        if tried.contains(&provider) {
            return None;
        }
        if !sticky_compatible(&provider, config) {
            *self.sticky.lock() = None;
            return None;
        }
        match self.holder.connection(&provider) {
            Some(conn) if conn.transport.is_available() => Some(conn),
            _ => None,
        }
    }

    fn enrich(&self, method: &str, attempts: u32, tried: &[Arc<ProviderInfo>], cause: RpcError) -> RpcError {
        RpcError::Invocation {
            service: self.service.clone(),
            method: method.to_string(),
            attempts,
            tried: tried.iter().map(|p| p.address()).collect(),
            cause: Box::new(cause),
        }
    }
}

/// Group and serialization must agree when both sides declare one.
fn sticky_compatible(provider: &ProviderInfo, config: &ConsumerConfig) -> bool {
    fn agree(a: Option<&str>, b: Option<&str>) -> bool {
        match (a, b) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
    agree(provider.group(), config.group.as_deref())
        && agree(provider.serialization(), config.serialization.as_deref())
}
