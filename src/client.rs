//! Consumer client: the public lifecycle and call API.
//!
//! # Data Flow
//! ```text
//! ClientBuilder::build (validate config, own callback pool, wire holder + cluster)
//!     → init (parse direct_url; eager: connect burst + loops, lazy: defer)
//!     → send_msg / send_msg_async / send_oneway / invoke
//!     → add / remove / update / reset providers, reload config, follow files
//!     → destroy (stop loops, drain in-flight, release transports)
//! ```

use arc_swap::ArcSwap;
use notify::RecommendedWatcher;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;

use crate::cluster::{build_strategy, CallContext, CallStats, CallStatsEntry, Cluster, InvokeResult};
use crate::config::validation::validate_config;
use crate::config::{load_provider_list, ConfigError, ConfigWatcher, ConsumerConfig, ProviderFileWatcher};
use crate::error::{Result, RpcError};
use crate::holder::{
    AvailabilityListener, ConnectionHolder, HolderConfig, NoopProbe, ProviderProbe, ProviderSnapshot,
};
use crate::load_balancer::{build_load_balancer, LoadBalancer};
use crate::observability::{logging, metrics};
use crate::provider::{parse_direct_urls, ProviderInfo};
use crate::transport::{CallbackPool, InvokeType, ResponseFuture, RpcRequest, RpcResponse, TransportFactory};

/// Assembles a [`ConsumerClient`].
pub struct ClientBuilder {
    config: ConsumerConfig,
    factory: Arc<dyn TransportFactory>,
    probe: Arc<dyn ProviderProbe>,
    load_balancer: Option<Arc<dyn LoadBalancer>>,
    listeners: Vec<Arc<dyn AvailabilityListener>>,
    callbacks: Option<CallbackPool>,
    logging: bool,
}

impl ClientBuilder {
    pub fn new(config: ConsumerConfig, factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            config,
            factory,
            probe: Arc::new(NoopProbe),
            load_balancer: None,
            listeners: Vec::new(),
            callbacks: None,
            logging: false,
        }
    }

    pub fn probe(mut self, probe: Arc<dyn ProviderProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Use a custom balancer instead of the configured one.
    pub fn load_balancer(mut self, load_balancer: Arc<dyn LoadBalancer>) -> Self {
        self.load_balancer = Some(load_balancer);
        self
    }

    pub fn availability_listener(mut self, listener: Arc<dyn AvailabilityListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Deliver listeners on `pool` instead of a pool built on the current runtime.
    pub fn callback_pool(mut self, pool: CallbackPool) -> Self {
        self.callbacks = Some(pool);
        self
    }

    /// Install a tracing subscriber from the `observability` section on build.
    pub fn init_logging(mut self) -> Self {
        self.logging = true;
        self
    }

    pub fn build(self) -> Result<ConsumerClient> {
        if self.logging {
            logging::init_logging(&self.config.observability);
        }
        metrics::describe_metrics();
        validate_config(&self.config).map_err(ConfigError::Validation)?;

        let config = self.config;
        let service = config.interface_id.clone();
        let callbacks = match self.callbacks {
            Some(pool) => pool,
            None => CallbackPool::from_current(config.callback.pool_size)?,
        };

        let mut transport_config = config.transport_config();
        transport_config.callbacks = Some(callbacks.clone());

        let stats = Arc::new(CallStats::new());
        let holder = ConnectionHolder::new(
            service.clone(),
            HolderConfig::from_consumer(&config),
            transport_config,
            self.factory,
            stats.clone(),
        )
        .with_probe(self.probe);
        for listener in self.listeners {
            holder.add_listener(listener);
        }
        let holder = Arc::new(holder);

        let load_balancer = self
            .load_balancer
            .unwrap_or_else(|| build_load_balancer(config.load_balancer, stats.clone()));
        let strategy = build_strategy(config.cluster);
        tracing::info!(
            service = %service,
            cluster = strategy.name(),
            load_balancer = load_balancer.name(),
            lazy = config.lazy,
            sticky = config.sticky,
            "Consumer client built"
        );

        let config = Arc::new(ArcSwap::from_pointee(config));
        let cluster = Arc::new(Cluster::new(
            config.clone(),
            holder.clone(),
            load_balancer,
            strategy,
            stats.clone(),
        ));

        Ok(ConsumerClient {
            service,
            config,
            cluster,
            holder,
            stats,
            callbacks,
            pending: Mutex::new(Vec::new()),
            connected: OnceCell::new(),
            initialized: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            watchers: Mutex::new(Vec::new()),
            followers: Mutex::new(Vec::new()),
        })
    }
}

/// Client side of one remote interface.
pub struct ConsumerClient {
    service: String,
    config: Arc<ArcSwap<ConsumerConfig>>,
    cluster: Arc<Cluster>,
    holder: Arc<ConnectionHolder>,
    stats: Arc<CallStats>,
    callbacks: CallbackPool,
    pending: Mutex<Vec<ProviderInfo>>,
    connected: OnceCell<()>,
    initialized: AtomicBool,
    destroyed: AtomicBool,
    watchers: Mutex<Vec<RecommendedWatcher>>,
    followers: Mutex<Vec<JoinHandle<()>>>,
}

impl ConsumerClient {
    pub fn builder(config: ConsumerConfig, factory: Arc<dyn TransportFactory>) -> ClientBuilder {
        ClientBuilder::new(config, factory)
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Initialise from the configured direct URLs.
    pub async fn init(&self) -> Result<()> {
        let config = self.config.load_full();
        let providers = match config.direct_url.as_deref() {
            Some(urls) if !urls.trim().is_empty() => parse_direct_urls(urls, &config.protocol)?,
            _ => Vec::new(),
        };
        self.init_with_providers(providers).await
    }

    /// Initialise from a provider list supplied by discovery. A second call is a no-op.
    pub async fn init_with_providers(&self, providers: Vec<ProviderInfo>) -> Result<()> {
        self.ensure_live()?;
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let config = self.config.load_full();
        self.pending.lock().extend(providers);

        if config.lazy {
            tracing::info!(service = %self.service, "Lazy consumer, deferring connect until first call");
            return Ok(());
        }

        self.ensure_connected().await;
        if config.check && !self.holder.is_available() {
            return Err(RpcError::Config(format!(
                "no provider of {} is reachable and check is enabled",
                self.service
            )));
        }
        Ok(())
    }

    /// Synchronous call: await the response.
    pub async fn send_msg(&self, request: RpcRequest) -> Result<RpcResponse> {
        let mut ctx = CallContext::new();
        self.send_msg_with(request, &mut ctx).await
    }

    pub async fn send_msg_with(&self, request: RpcRequest, ctx: &mut CallContext) -> Result<RpcResponse> {
        let result = self.invoke_with(&request, ctx, InvokeType::Sync).await?;
        result.into_response().ok_or_else(|| RpcError::EmptyResponse {
            provider: ctx.provider.as_ref().map(|p| p.address()).unwrap_or_default(),
            method: request.method.clone(),
        })
    }

    /// Hand the request off and return its future.
    pub async fn send_msg_async(&self, request: RpcRequest) -> Result<Arc<ResponseFuture>> {
        let mut ctx = CallContext::new();
        let result = self.invoke_with(&request, &mut ctx, InvokeType::Future).await?;
        result
            .into_future()
            .ok_or_else(|| RpcError::Local(format!("{} returned no future", request.method)))
    }

    /// Fire and forget.
    pub async fn send_oneway(&self, request: RpcRequest) -> Result<()> {
        let mut ctx = CallContext::new();
        self.invoke_with(&request, &mut ctx, InvokeType::Oneway).await?;
        Ok(())
    }

    /// Call with the invoke type configured for the method.
    pub async fn invoke(&self, request: &RpcRequest, ctx: &mut CallContext) -> Result<InvokeResult> {
        let invoke_type = self.config.load().method_invoke_type(&request.method);
        self.invoke_with(request, ctx, invoke_type).await
    }

    pub async fn invoke_with(
        &self,
        request: &RpcRequest,
        ctx: &mut CallContext,
        invoke_type: InvokeType,
    ) -> Result<InvokeResult> {
        self.ensure_live()?;
        self.ensure_connected().await;
        self.cluster.invoke(request, ctx, invoke_type).await
    }

    pub async fn add_providers(&self, providers: Vec<ProviderInfo>) -> Result<usize> {
        self.ensure_live()?;
        self.ensure_connected().await;
        Ok(self.holder.add_providers(providers).await)
    }

    pub async fn remove_providers(&self, providers: &[ProviderInfo]) -> Result<usize> {
        self.ensure_live()?;
        Ok(self.holder.remove_providers(providers).await)
    }

    /// Converge on a refreshed provider list. Returns `(added, removed)`.
    pub async fn update_providers(&self, providers: Vec<ProviderInfo>) -> Result<(usize, usize)> {
        self.ensure_live()?;
        self.ensure_connected().await;
        Ok(self.holder.update_providers(providers).await)
    }

    /// Tear down every transport and connect to `providers`, rejecting calls meanwhile
    /// when the cluster is resettable.
    pub async fn reset_providers(&self, providers: Vec<ProviderInfo>) -> Result<usize> {
        self.ensure_live()?;
        self.ensure_connected().await;
        Ok(self.cluster.reset(providers).await)
    }

    pub fn is_available(&self) -> bool {
        !self.is_destroyed() && self.holder.is_available()
    }

    pub fn current_providers(&self) -> Vec<Arc<ProviderInfo>> {
        self.holder.current_providers()
    }

    pub fn current_provider_map(&self) -> ProviderSnapshot {
        self.holder.current_provider_map()
    }

    pub fn call_stats(&self) -> Vec<CallStatsEntry> {
        self.stats.snapshot()
    }

    pub fn config(&self) -> Arc<ConsumerConfig> {
        self.config.load_full()
    }

    pub fn holder(&self) -> &Arc<ConnectionHolder> {
        &self.holder
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    /// Swap call settings (timeouts, retries, sticky, routers, method overrides).
    ///
    /// Identity and connection settings are fixed for the client's lifetime.
    pub fn reload_config(&self, config: ConsumerConfig) -> Result<()> {
        validate_config(&config).map_err(ConfigError::Validation)?;
        let current = self.config.load();
        if config.interface_id != current.interface_id || config.protocol != current.protocol {
            return Err(RpcError::Config(format!(
                "cannot change identity of {} from {}/{} to {}/{}",
                self.service, current.interface_id, current.protocol, config.interface_id, config.protocol
            )));
        }
        if config.cluster != current.cluster || config.load_balancer != current.load_balancer {
            tracing::warn!(service = %self.service, "Cluster and load balancer changes need a new client");
        }
        drop(current);

        self.config.store(Arc::new(config));
        self.cluster.reload_routers();
        tracing::info!(service = %self.service, "Consumer config reloaded");
        Ok(())
    }

    /// Reload call settings whenever the config file changes.
    pub fn watch_config(self: &Arc<Self>, path: &Path) -> Result<()> {
        self.ensure_live()?;
        let (watcher, mut updates) = ConfigWatcher::config(path);
        let watcher = watcher
            .run()
            .map_err(|e| RpcError::Config(format!("cannot watch {}: {}", path.display(), e)))?;
        self.watchers.lock().push(watcher);

        let client: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while let Some(config) = updates.recv().await {
                let Some(client) = client.upgrade() else {
                    break;
                };
                if let Err(e) = client.reload_config(config) {
                    tracing::error!(service = %client.service, error = %e, "Rejected reloaded config");
                }
            }
        });
        self.followers.lock().push(task);
        Ok(())
    }

    /// Apply a provider list file now and on every change.
    pub async fn follow_provider_file(self: &Arc<Self>, path: &Path) -> Result<()> {
        self.ensure_live()?;
        let protocol = self.config.load().protocol.clone();

        let initial = load_provider_list(path, &protocol)?;
        self.update_providers(initial).await?;

        let (watcher, mut updates) = ProviderFileWatcher::providers(path, &protocol);
        let watcher = watcher
            .run()
            .map_err(|e| RpcError::Config(format!("cannot watch {}: {}", path.display(), e)))?;
        self.watchers.lock().push(watcher);

        let client: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while let Some(providers) = updates.recv().await {
                let Some(client) = client.upgrade() else {
                    break;
                };
                if let Err(e) = client.update_providers(providers).await {
                    tracing::warn!(service = %client.service, error = %e, "Provider file update ignored");
                }
            }
        });
        self.followers.lock().push(task);
        Ok(())
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Stop loops and watchers, drain in-flight calls, release transports. Idempotent.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(service = %self.service, "Destroying consumer client");

        self.watchers.lock().clear();
        let followers = std::mem::take(&mut *self.followers.lock());
        for task in followers {
            task.abort();
        }

        let drain = Duration::from_millis(self.config.load().connection.disconnect_timeout_ms);
        if !self.stats.wait_all_idle(drain).await {
            tracing::warn!(
                service = %self.service,
                in_flight = self.stats.total_in_flight(),
                "Drain timed out, releasing transports with calls in flight"
            );
        }
        self.holder.destroy().await;
        self.callbacks.close();
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(RpcError::Destroyed(self.service.clone()));
        }
        Ok(())
    }

    /// Run the initial connect burst exactly once.
    async fn ensure_connected(&self) {
        self.connected
            .get_or_init(|| async {
                let providers = std::mem::take(&mut *self.pending.lock());
                let count = providers.len();
                let alive = self.holder.add_providers(providers).await;
                self.holder.start();
                tracing::info!(service = %self.service, providers = count, alive, "Consumer connected");
            })
            .await;
    }
}

impl std::fmt::Debug for ConsumerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerClient")
            .field("service", &self.service)
            .field("holder", &self.holder)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
