//! Connection holder: provider health classification and its background loops.
//!
//! # Data Flow
//! ```text
//! add_providers(list)
//!     → entries inserted into retry (connecting)
//!     → parallel connect burst (≤ parallel_connect_cap at a time)
//!         connect → open? → sleep(double_check_delay) → open? → probe
//!     → alive | retry (soft failure: elevated backoff coefficient)
//!
//! reconnect loop (fixed delay)            heartbeat loop (fixed delay)
//!     retry, tick % coefficient == 0          alive + sub_health
//!     → same connect burst                    → closed:   → retry
//!     → alive | retry (coefficient × 2)       → failed:   alive → sub_health → retry
//!                                             → ok:       sub_health → alive
//! ```
//!
//! # Design Decisions
//! - One mutex guards the arena; every transition is a single field write under it
//! - Network I/O never happens with the lock held
//! - Availability listeners fire on edges of (alive ∪ sub_health) being non-empty,
//!   after the lock is released
//! - Connection-management failures are logged and folded into state, never returned

pub mod probe;
pub(crate) mod scheduler;
pub mod state;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};

use crate::cluster::stats::CallStats;
use crate::config::ConsumerConfig;
use crate::error::RpcError;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::provider::{ProviderInfo, ProviderKey};
use crate::resilience::backoff::{ReconnectBackoff, INITIAL_COEFFICIENT};
use crate::transport::{Transport, TransportConfig, TransportFactory};

pub use probe::{NoopProbe, ProbeResult, ProviderProbe};
pub use state::{Partition, ProviderArena, ProviderEntry, ProviderId};

use scheduler::LoopKind;

/// Notified when a consumer gains or loses its last connected provider.
pub trait AvailabilityListener: Send + Sync {
    fn on_available(&self, service: &str);
    fn on_unavailable(&self, service: &str);
}

/// A provider paired with its transport, as handed to a call.
#[derive(Debug, Clone)]
pub struct Connection {
    pub provider: Arc<ProviderInfo>,
    pub transport: Arc<dyn Transport>,
    /// Negotiated version, or the version the provider advertises.
    pub rpc_version: u32,
}

/// Diagnostic view of one provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub provider: ProviderInfo,
    pub partition: Partition,
    pub heartbeat_failures: u32,
    pub reconnect_failures: u32,
    pub backoff_coefficient: u32,
    pub connecting: bool,
    pub negotiated_version: Option<u32>,
}

impl ProviderStatus {
    fn of(entry: &ProviderEntry) -> Self {
        Self {
            provider: (*entry.provider).clone(),
            partition: entry.partition,
            heartbeat_failures: entry.heartbeat_failures,
            reconnect_failures: entry.reconnect_failures,
            backoff_coefficient: entry.coefficient,
            connecting: entry.connecting,
            negotiated_version: entry.negotiated_version,
        }
    }
}

/// Snapshot of all partitions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProviderSnapshot {
    pub alive: Vec<ProviderStatus>,
    pub sub_health: Vec<ProviderStatus>,
    pub retry: Vec<ProviderStatus>,
}

impl ProviderSnapshot {
    pub fn len(&self) -> usize {
        self.alive.len() + self.sub_health.len() + self.retry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Partitions containing `provider`. More than one would be a bug.
    pub fn partitions_of(&self, provider: &ProviderInfo) -> Vec<Partition> {
        let mut found = Vec::new();
        for (partition, list) in [
            (Partition::Alive, &self.alive),
            (Partition::SubHealth, &self.sub_health),
            (Partition::Retry, &self.retry),
        ] {
            found.extend(list.iter().filter(|s| &s.provider == provider).map(|_| partition));
        }
        found
    }
}

/// Tunables of a holder.
#[derive(Debug, Clone)]
pub struct HolderConfig {
    pub connect_timeout: Duration,
    pub disconnect_timeout: Duration,
    pub double_check_delay: Duration,
    pub parallel_connect_cap: usize,
    pub init_slack: Duration,
    /// `None` disables the heartbeat loop.
    pub heartbeat_period: Option<Duration>,
    pub heartbeat_timeout: Duration,
    pub sub_health_threshold: u32,
    pub retry_threshold: u32,
    /// `None` disables the reconnect loop.
    pub reconnect_period: Option<Duration>,
    pub backoff: ReconnectBackoff,
}

impl HolderConfig {
    pub fn from_consumer(config: &ConsumerConfig) -> Self {
        let conn = &config.connection;
        Self {
            connect_timeout: Duration::from_millis(conn.connect_timeout_ms),
            disconnect_timeout: Duration::from_millis(conn.disconnect_timeout_ms),
            double_check_delay: Duration::from_millis(conn.double_check_delay_ms),
            parallel_connect_cap: conn.parallel_connect_cap.max(1),
            init_slack: Duration::from_millis(conn.init_slack_ms),
            heartbeat_period: config.effective_heartbeat_period(),
            heartbeat_timeout: Duration::from_millis(config.heartbeat.timeout_ms.max(1)),
            sub_health_threshold: config.heartbeat.sub_health_threshold.max(1),
            retry_threshold: config.heartbeat.retry_threshold.max(1),
            reconnect_period: config.effective_reconnect_period(),
            backoff: ReconnectBackoff::new(
                config.reconnect.max_coefficient,
                config.reconnect.soft_failure_coefficient,
            ),
        }
    }

    /// Wall-clock budget of a burst of `n` connects.
    fn burst_budget(&self, n: usize) -> Duration {
        let pool = self.parallel_connect_cap.max(1).min(n.max(1));
        let rounds = n.div_ceil(pool) as u32;
        (self.connect_timeout + self.double_check_delay) * rounds + self.init_slack
    }
}

impl Default for HolderConfig {
    fn default() -> Self {
        Self::from_consumer(&ConsumerConfig::default())
    }
}

enum ConnectOutcome {
    Connected(Option<u32>),
    Rejected(&'static str),
    Failed(RpcError),
}

enum HeartbeatOutcome {
    Ok,
    Closed,
    Failed(String),
}

struct HolderState {
    arena: ProviderArena,
    available: bool,
}

type Batch = Vec<(ProviderId, Arc<ProviderInfo>, Arc<dyn Transport>)>;

/// Owns the provider → transport map and its health partitions.
pub struct ConnectionHolder {
    service: String,
    config: HolderConfig,
    transport_config: TransportConfig,
    factory: Arc<dyn TransportFactory>,
    probe: Arc<dyn ProviderProbe>,
    stats: Arc<CallStats>,
    state: Mutex<HolderState>,
    listeners: RwLock<Vec<Arc<dyn AvailabilityListener>>>,
    reconnect_ticks: AtomicU64,
    shutdown: Shutdown,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl ConnectionHolder {
    pub fn new(
        service: impl Into<String>,
        config: HolderConfig,
        transport_config: TransportConfig,
        factory: Arc<dyn TransportFactory>,
        stats: Arc<CallStats>,
    ) -> Self {
        Self {
            service: service.into(),
            config,
            transport_config,
            factory,
            probe: Arc::new(NoopProbe),
            stats,
            state: Mutex::new(HolderState {
                arena: ProviderArena::new(),
                available: false,
            }),
            listeners: RwLock::new(Vec::new()),
            reconnect_ticks: AtomicU64::new(0),
            shutdown: Shutdown::new(),
            tasks: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn ProviderProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn config(&self) -> &HolderConfig {
        &self.config
    }

    pub fn add_listener(&self, listener: Arc<dyn AvailabilityListener>) {
        self.listeners.write().push(listener);
    }

    /// Spawn the reconnect and heartbeat loops. Disabled periods spawn nothing.
    pub fn start(self: &Arc<Self>) {
        if self.is_destroyed() {
            return;
        }
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }
        if let Some(period) = self.config.reconnect_period {
            tasks.push(scheduler::spawn_loop(
                Arc::clone(self),
                LoopKind::Reconnect,
                period,
                self.shutdown.subscribe(),
            ));
        }
        if let Some(period) = self.config.heartbeat_period {
            tasks.push(scheduler::spawn_loop(
                Arc::clone(self),
                LoopKind::Heartbeat,
                period,
                self.shutdown.subscribe(),
            ));
        }
    }

    /// Connect new providers. Known providers are skipped.
    ///
    /// Returns how many of them ended up alive.
    pub async fn add_providers(&self, providers: Vec<ProviderInfo>) -> usize {
        if self.is_destroyed() {
            tracing::warn!(service = %self.service, "Ignoring providers added after destroy");
            return 0;
        }

        let mut batch: Batch = Vec::new();
        {
            let mut state = self.state.lock();
            for provider in providers {
                if state.arena.lookup(&provider.key()).is_some() {
                    tracing::debug!(service = %self.service, provider = %provider, "Provider already known");
                    continue;
                }
                let provider = Arc::new(provider);
                let transport = self.factory.create(&provider, &self.transport_config);
                let mut entry = ProviderEntry::new(provider.clone(), transport.clone());
                entry.connecting = true;
                if let Some(id) = state.arena.insert(entry) {
                    batch.push((id, provider, transport));
                }
            }
        }

        if batch.is_empty() {
            return 0;
        }
        tracing::info!(service = %self.service, count = batch.len(), "Adding providers");
        self.connect_burst(batch, false).await
    }

    /// Remove providers from whichever partition holds them and release their transports.
    pub async fn remove_providers(&self, providers: &[ProviderInfo]) -> usize {
        let (removed, edge) = {
            let mut state = self.state.lock();
            let mut removed = Vec::new();
            for provider in providers {
                if let Some(id) = state.arena.lookup(&provider.key()) {
                    if let Some(entry) = state.arena.remove(id) {
                        removed.push(entry);
                    }
                }
            }
            let edge = self.settle(&mut state);
            (removed, edge)
        };
        self.notify(edge);

        for entry in &removed {
            tracing::info!(
                service = %self.service,
                provider = %entry.provider,
                partition = %entry.partition,
                "Provider removed"
            );
        }
        let count = removed.len();
        self.release(removed).await;
        count
    }

    /// Remove every provider.
    pub async fn remove_all(&self) -> usize {
        let (removed, edge) = {
            let mut state = self.state.lock();
            let removed = state.arena.drain();
            let edge = self.settle(&mut state);
            (removed, edge)
        };
        self.notify(edge);
        let count = removed.len();
        if count > 0 {
            tracing::info!(service = %self.service, count, "All providers removed");
        }
        self.release(removed).await;
        count
    }

    /// Converge on `providers`: remove the vanished, add the new.
    ///
    /// Returns `(added, removed)`. An empty list removes everything.
    pub async fn update_providers(&self, providers: Vec<ProviderInfo>) -> (usize, usize) {
        let incoming: HashSet<ProviderKey> = providers.iter().map(ProviderInfo::key).collect();
        let (stale, fresh) = {
            let state = self.state.lock();
            let stale: Vec<ProviderInfo> = state
                .arena
                .iter()
                .filter(|(_, e)| !incoming.contains(&e.provider.key()))
                .map(|(_, e)| (*e.provider).clone())
                .collect();
            let fresh: Vec<ProviderInfo> = providers
                .into_iter()
                .filter(|p| state.arena.lookup(&p.key()).is_none())
                .collect();
            (stale, fresh)
        };

        tracing::info!(
            service = %self.service,
            added = fresh.len(),
            removed = stale.len(),
            "Updating providers"
        );
        let removed = self.remove_providers(&stale).await;
        let added = fresh.len();
        self.add_providers(fresh).await;
        (added, removed)
    }

    /// Providers eligible for business calls.
    pub fn alive_providers(&self) -> Vec<Arc<ProviderInfo>> {
        let state = self.state.lock();
        state
            .arena
            .iter()
            .filter(|(_, e)| e.partition == Partition::Alive)
            .map(|(_, e)| e.provider.clone())
            .collect()
    }

    /// Every known provider, in any partition.
    pub fn current_providers(&self) -> Vec<Arc<ProviderInfo>> {
        let state = self.state.lock();
        state.arena.iter().map(|(_, e)| e.provider.clone()).collect()
    }

    pub fn current_provider_map(&self) -> ProviderSnapshot {
        let state = self.state.lock();
        let mut snapshot = ProviderSnapshot::default();
        for (_, entry) in state.arena.iter() {
            let status = ProviderStatus::of(entry);
            match entry.partition {
                Partition::Alive => snapshot.alive.push(status),
                Partition::SubHealth => snapshot.sub_health.push(status),
                Partition::Retry => snapshot.retry.push(status),
            }
        }
        snapshot
    }

    pub fn status(&self, provider: &ProviderInfo) -> Option<ProviderStatus> {
        let state = self.state.lock();
        let id = state.arena.lookup(&provider.key())?;
        state.arena.get(id).map(ProviderStatus::of)
    }

    pub fn partition_of(&self, provider: &ProviderInfo) -> Option<Partition> {
        self.status(provider).map(|s| s.partition)
    }

    /// Connection to `provider` if it is alive.
    pub fn connection(&self, provider: &ProviderInfo) -> Option<Connection> {
        let state = self.state.lock();
        let id = state.arena.lookup(&provider.key())?;
        let entry = state.arena.get(id)?;
        if entry.partition != Partition::Alive {
            return None;
        }
        Some(Connection {
            provider: entry.provider.clone(),
            transport: entry.transport.clone(),
            rpc_version: entry.rpc_version(),
        })
    }

    /// Alive provider matching `host:port` or `protocol://host:port`.
    pub fn find_alive(&self, address: &str) -> Option<Arc<ProviderInfo>> {
        let address = address.trim_end_matches('/');
        let state = self.state.lock();
        let found = state
            .arena
            .iter()
            .filter(|(_, e)| e.partition == Partition::Alive)
            .map(|(_, e)| &e.provider)
            .find(|p| {
                let plain = p.address();
                address == plain || address == format!("{}://{}", p.protocol(), plain)
            })
            .cloned();
        found
    }

    /// True while at least one provider is alive or sub-health.
    pub fn is_available(&self) -> bool {
        self.state.lock().available
    }

    pub fn has_alive(&self) -> bool {
        self.state.lock().arena.count(Partition::Alive) > 0
    }

    pub fn len(&self) -> usize {
        self.state.lock().arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move a connected provider to retry, e.g. after its connection closed mid-call.
    pub fn demote_to_retry(&self, provider: &ProviderInfo, reason: &str) -> bool {
        let (moved, edge) = {
            let mut state = self.state.lock();
            let moved = match state.arena.lookup(&provider.key()) {
                Some(id) => match state.arena.get_mut(id) {
                    Some(entry) if entry.partition.is_connected() => {
                        self.enter_retry(entry, reason);
                        true
                    }
                    _ => false,
                },
                None => false,
            };
            let edge = self.settle(&mut state);
            (moved, edge)
        };
        self.notify(edge);
        moved
    }

    /// A business call succeeded: the provider is evidently reachable.
    pub fn record_success(&self, provider: &ProviderInfo) {
        let mut state = self.state.lock();
        if let Some(id) = state.arena.lookup(&provider.key()) {
            if let Some(entry) = state.arena.get_mut(id) {
                entry.heartbeat_failures = 0;
            }
        }
    }

    /// One reconnect pass over the retry partition. Returns how many were promoted.
    pub async fn reconnect_tick(&self) -> usize {
        if self.is_destroyed() {
            return 0;
        }
        let tick = self.reconnect_ticks.fetch_add(1, Ordering::SeqCst) + 1;
        let backoff = self.config.backoff;

        let batch: Batch = {
            let mut state = self.state.lock();
            let mut batch = Vec::new();
            for id in state.arena.ids_in(Partition::Retry) {
                if let Some(entry) = state.arena.get_mut(id) {
                    if entry.connecting || !backoff.should_attempt(tick, entry.coefficient) {
                        continue;
                    }
                    entry.connecting = true;
                    batch.push((id, entry.provider.clone(), entry.transport.clone()));
                }
            }
            batch
        };

        if batch.is_empty() {
            return 0;
        }
        tracing::debug!(service = %self.service, tick, count = batch.len(), "Reconnecting providers");
        self.connect_burst(batch, true).await
    }

    /// One heartbeat pass over alive and sub-health providers.
    pub async fn heartbeat_tick(&self) {
        if self.is_destroyed() {
            return;
        }
        let targets = {
            let state = self.state.lock();
            state
                .arena
                .iter()
                .filter(|(_, e)| e.partition.is_connected())
                .map(|(id, e)| (id, e.epoch, e.provider.clone(), e.transport.clone()))
                .collect::<Vec<_>>()
        };
        if targets.is_empty() {
            return;
        }

        let permits = Arc::new(Semaphore::new(self.config.parallel_connect_cap.max(1)));
        let timeout = self.config.heartbeat_timeout;
        let mut set = JoinSet::new();
        for (id, epoch, provider, transport) in targets {
            let permits = permits.clone();
            let service = self.service.clone();
            set.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let outcome = if !transport.is_open() {
                    HeartbeatOutcome::Closed
                } else {
                    match tokio::time::timeout(timeout, transport.heartbeat(&service, timeout)).await {
                        Ok(Ok(())) => HeartbeatOutcome::Ok,
                        Ok(Err(e)) => HeartbeatOutcome::Failed(e.to_string()),
                        Err(_) => HeartbeatOutcome::Failed(format!("no answer within {}ms", timeout.as_millis())),
                    }
                };
                (id, epoch, provider, outcome)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => tracing::warn!(service = %self.service, error = %e, "Heartbeat task failed"),
            }
        }

        let edge = {
            let mut state = self.state.lock();
            for (id, epoch, provider, outcome) in results {
                match state.arena.get_mut(id) {
                    Some(entry) if entry.epoch == epoch => self.apply_heartbeat(entry, outcome),
                    Some(_) => {
                        tracing::debug!(
                            service = %self.service,
                            provider = %provider,
                            "Dropping heartbeat of a replaced connection"
                        );
                    }
                    None => {
                        tracing::debug!(service = %self.service, provider = %provider, "Heartbeat for removed provider");
                    }
                }
            }
            self.settle(&mut state)
        };
        self.notify(edge);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Stop both loops, then drain and release every transport. Idempotent.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.trigger();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.abort();
            let _ = task.await;
        }

        let (entries, edge) = {
            let mut state = self.state.lock();
            let entries = state.arena.drain();
            let edge = self.settle(&mut state);
            (entries, edge)
        };
        self.notify(edge);

        let count = entries.len();
        self.release(entries).await;
        tracing::info!(service = %self.service, released = count, "Connection holder destroyed");
    }

    fn apply_heartbeat(&self, entry: &mut ProviderEntry, outcome: HeartbeatOutcome) {
        match outcome {
            HeartbeatOutcome::Ok => {
                entry.heartbeat_failures = 0;
                if entry.partition == Partition::SubHealth {
                    entry.partition = Partition::Alive;
                    tracing::info!(
                        service = %self.service,
                        provider = %entry.provider,
                        "Provider recovered from sub-health"
                    );
                }
            }
            HeartbeatOutcome::Closed => {
                self.enter_retry(entry, "connection closed");
            }
            HeartbeatOutcome::Failed(detail) => {
                entry.heartbeat_failures = entry.heartbeat_failures.saturating_add(1);
                tracing::debug!(
                    service = %self.service,
                    provider = %entry.provider,
                    failures = entry.heartbeat_failures,
                    detail = %detail,
                    "Heartbeat failed"
                );
                match entry.partition {
                    Partition::Alive if entry.heartbeat_failures >= self.config.sub_health_threshold => {
                        entry.partition = Partition::SubHealth;
                        tracing::warn!(
                            service = %self.service,
                            provider = %entry.provider,
                            failures = entry.heartbeat_failures,
                            "Provider moved to sub-health"
                        );
                    }
                    Partition::SubHealth if entry.heartbeat_failures >= self.config.retry_threshold => {
                        self.enter_retry(entry, "heartbeat failures exceeded retry threshold");
                    }
                    _ => {}
                }
            }
        }
    }

    fn enter_retry(&self, entry: &mut ProviderEntry, reason: &str) {
        let from = entry.partition;
        entry.partition = Partition::Retry;
        entry.epoch += 1;
        entry.heartbeat_failures = 0;
        entry.coefficient = INITIAL_COEFFICIENT;
        tracing::warn!(
            service = %self.service,
            provider = %entry.provider,
            from = %from,
            reason,
            "Provider moved to retry"
        );
    }

    async fn connect_burst(&self, batch: Batch, reconnect: bool) -> usize {
        let n = batch.len();
        let pool = self.config.parallel_connect_cap.max(1).min(n);
        let budget = self.config.burst_budget(n);
        let permits = Arc::new(Semaphore::new(pool));

        let mut pending: HashSet<ProviderId> = batch.iter().map(|(id, _, _)| *id).collect();
        let mut set = JoinSet::new();
        for (id, provider, transport) in batch {
            let permits = permits.clone();
            let probe = self.probe.clone();
            let connect_timeout = self.config.connect_timeout;
            let delay = self.config.double_check_delay;
            set.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let outcome =
                    connect_and_verify(&provider, transport.as_ref(), probe.as_ref(), connect_timeout, delay, reconnect)
                        .await;
                (id, provider, transport, outcome)
            });
        }

        let mut promoted = 0;
        let drained = tokio::time::timeout(budget, async {
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((id, provider, transport, outcome)) => {
                        pending.remove(&id);
                        if self.apply_connect(id, &provider, transport, outcome, reconnect).await {
                            promoted += 1;
                        }
                    }
                    Err(e) => tracing::warn!(service = %self.service, error = %e, "Connect task failed"),
                }
            }
        })
        .await;

        if drained.is_err() {
            set.abort_all();
            tracing::warn!(
                service = %self.service,
                unfinished = pending.len(),
                budget_ms = budget.as_millis() as u64,
                "Connect burst timed out, leaving unfinished providers in retry"
            );
        }
        if !pending.is_empty() {
            let mut state = self.state.lock();
            for id in pending {
                if let Some(entry) = state.arena.get_mut(id) {
                    entry.connecting = false;
                }
            }
        }
        promoted
    }

    async fn apply_connect(
        &self,
        id: ProviderId,
        provider: &ProviderInfo,
        transport: Arc<dyn Transport>,
        outcome: ConnectOutcome,
        reconnect: bool,
    ) -> bool {
        let backoff = self.config.backoff;
        let (known, promoted, edge) = {
            let mut state = self.state.lock();
            match state.arena.get_mut(id) {
                None => (false, false, None),
                Some(entry) => {
                    entry.connecting = false;
                    let promoted = match &outcome {
                        ConnectOutcome::Connected(version) => {
                            entry.partition = Partition::Alive;
                            entry.epoch += 1;
                            entry.negotiated_version = *version;
                            entry.heartbeat_failures = 0;
                            entry.reconnect_failures = 0;
                            entry.coefficient = INITIAL_COEFFICIENT;
                            tracing::info!(
                                service = %self.service,
                                provider = %provider,
                                reconnect,
                                "Provider connected"
                            );
                            true
                        }
                        ConnectOutcome::Rejected(reason) => {
                            entry.partition = Partition::Retry;
                            entry.reconnect_failures = entry.reconnect_failures.saturating_add(1);
                            entry.coefficient = backoff.after_soft_failure();
                            tracing::warn!(
                                service = %self.service,
                                provider = %provider,
                                reason,
                                coefficient = entry.coefficient,
                                "Provider rejected after connect"
                            );
                            false
                        }
                        ConnectOutcome::Failed(err) => {
                            entry.partition = Partition::Retry;
                            entry.reconnect_failures = entry.reconnect_failures.saturating_add(1);
                            if reconnect {
                                entry.coefficient = backoff.after_failure(entry.coefficient);
                            }
                            tracing::warn!(
                                service = %self.service,
                                provider = %provider,
                                error = %err,
                                failures = entry.reconnect_failures,
                                coefficient = entry.coefficient,
                                "Provider connect failed"
                            );
                            false
                        }
                    };
                    let edge = self.settle(&mut state);
                    (true, promoted, edge)
                }
            }
        };
        self.notify(edge);

        if !known {
            tracing::debug!(service = %self.service, provider = %provider, "Provider removed while connecting");
            transport.disconnect().await;
        } else if matches!(outcome, ConnectOutcome::Rejected(_)) {
            transport.disconnect().await;
        }
        promoted
    }

    /// Recompute availability under the lock. Returns the new value on an edge.
    fn settle(&self, state: &mut HolderState) -> Option<bool> {
        let arena = &state.arena;
        let alive = arena.count(Partition::Alive);
        let sub_health = arena.count(Partition::SubHealth);
        metrics::record_partitions(&self.service, alive, sub_health, arena.count(Partition::Retry));

        let available = alive + sub_health > 0;
        if available == state.available {
            return None;
        }
        state.available = available;
        Some(available)
    }

    fn notify(&self, edge: Option<bool>) {
        let Some(available) = edge else {
            return;
        };
        metrics::record_availability_change(&self.service, available);
        if available {
            tracing::info!(service = %self.service, "Consumer became available");
        } else {
            tracing::warn!(service = %self.service, "Consumer became unavailable");
        }

        let listeners = self.listeners.read().clone();
        for listener in listeners {
            if available {
                listener.on_available(&self.service);
            } else {
                listener.on_unavailable(&self.service);
            }
        }
    }

    /// Drain and disconnect transports in parallel.
    async fn release(&self, entries: Vec<ProviderEntry>) {
        if entries.is_empty() {
            return;
        }
        let drain = self.config.disconnect_timeout;
        let close = self.config.connect_timeout;
        let mut set = JoinSet::new();
        for entry in entries {
            let stats = self.stats.clone();
            let service = self.service.clone();
            set.spawn(async move {
                let key = entry.provider.key();
                if !stats.wait_idle(&key, drain).await {
                    tracing::warn!(
                        service = %service,
                        provider = %entry.provider,
                        in_flight = stats.in_flight(&key),
                        "Releasing provider with calls still in flight"
                    );
                }
                if tokio::time::timeout(close, entry.transport.disconnect()).await.is_err() {
                    tracing::warn!(service = %service, provider = %entry.provider, "Disconnect timed out");
                }
                stats.forget(&key);
            });
        }
        while set.join_next().await.is_some() {}
    }
}

impl std::fmt::Debug for ConnectionHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ConnectionHolder")
            .field("service", &self.service)
            .field("providers", &state.arena.len())
            .field("available", &state.available)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

async fn connect_and_verify(
    provider: &ProviderInfo,
    transport: &dyn Transport,
    probe: &dyn ProviderProbe,
    connect_timeout: Duration,
    double_check_delay: Duration,
    reconnect: bool,
) -> ConnectOutcome {
    if reconnect && transport.is_open() {
        transport.disconnect().await;
    }

    match tokio::time::timeout(connect_timeout, transport.connect()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return ConnectOutcome::Failed(e),
        Err(_) => {
            return ConnectOutcome::Failed(RpcError::Transport(format!(
                "connect to {} timed out after {}ms",
                provider,
                connect_timeout.as_millis()
            )))
        }
    }

    if !transport.is_open() {
        return ConnectOutcome::Rejected("closed right after connect");
    }
    tokio::time::sleep(double_check_delay).await;
    if !transport.is_open() {
        return ConnectOutcome::Rejected("closed during double-check");
    }

    match probe.probe(provider, transport).await {
        Ok(result) if result.exported_fully => ConnectOutcome::Connected(result.negotiated_version),
        Ok(_) => ConnectOutcome::Rejected("service not fully exported"),
        Err(e) => {
            tracing::debug!(provider = %provider, error = %e, "Probe failed, promoting anyway");
            ConnectOutcome::Connected(None)
        }
    }
}
