//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for a consumer.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::transport::{InvokeType, TransportConfig};

/// Heartbeat period floor.
pub const MIN_HEARTBEAT_PERIOD: Duration = Duration::from_secs(5);

/// Reconnect period floor.
pub const MIN_RECONNECT_PERIOD: Duration = Duration::from_secs(2);

/// Root configuration for one consumer (one remote interface).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Remote interface name, e.g. "com.acme.EchoService".
    pub interface_id: String,

    /// Protocol the consumer speaks; direct URLs must agree.
    pub protocol: String,

    /// Provider group (alias). Providers in another group are not sticky-compatible.
    pub group: Option<String>,

    /// Preferred serialization.
    pub serialization: Option<String>,

    /// Direct provider URLs, separated by ';' or ','.
    pub direct_url: Option<String>,

    /// Fail `init` when no provider is reachable.
    pub check: bool,

    /// Defer connecting until the first call.
    pub lazy: bool,

    /// Reuse the last provider while it stays healthy.
    pub sticky: bool,

    /// Fault-tolerance strategy.
    pub cluster: ClusterKind,

    /// Provider selection policy.
    pub load_balancer: LoadBalancerKind,

    /// Minimum provider rpc version that receives negotiation hints (0 disables).
    pub negotiation_min_version: u32,

    /// Routing rules, applied by priority.
    pub routers: Vec<RouterRuleConfig>,

    /// Interface-level call settings.
    pub invoke: InvokeConfig,

    /// Method-level overrides keyed by method name.
    pub methods: HashMap<String, MethodConfig>,

    pub connection: ConnectionConfig,

    pub heartbeat: HeartbeatConfig,

    pub reconnect: ReconnectConfig,

    pub callback: CallbackConfig,

    pub observability: ObservabilityConfig,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            interface_id: String::new(),
            protocol: "bolt".to_string(),
            group: None,
            serialization: None,
            direct_url: None,
            check: false,
            lazy: false,
            sticky: false,
            cluster: ClusterKind::default(),
            load_balancer: LoadBalancerKind::default(),
            negotiation_min_version: 1,
            routers: Vec::new(),
            invoke: InvokeConfig::default(),
            methods: HashMap::new(),
            connection: ConnectionConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
            callback: CallbackConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl ConsumerConfig {
    pub fn new(interface_id: impl Into<String>) -> Self {
        Self {
            interface_id: interface_id.into(),
            ..Default::default()
        }
    }

    /// Invoke timeout for `method`; method level wins.
    pub fn method_timeout(&self, method: &str) -> Duration {
        let ms = self
            .methods
            .get(method)
            .and_then(|m| m.timeout_ms)
            .unwrap_or(self.invoke.timeout_ms);
        Duration::from_millis(ms)
    }

    /// Retry count for `method`; method level wins.
    pub fn method_retries(&self, method: &str) -> u32 {
        self.methods
            .get(method)
            .and_then(|m| m.retries)
            .unwrap_or(self.invoke.retries)
    }

    pub fn method_invoke_type(&self, method: &str) -> InvokeType {
        self.methods
            .get(method)
            .and_then(|m| m.invoke_type)
            .unwrap_or(self.invoke.invoke_type)
    }

    /// Heartbeat period with the floor applied; `None` when disabled.
    pub fn effective_heartbeat_period(&self) -> Option<Duration> {
        floored(self.heartbeat.period_ms, MIN_HEARTBEAT_PERIOD)
    }

    /// Reconnect period with the floor applied; `None` when disabled.
    pub fn effective_reconnect_period(&self) -> Option<Duration> {
        floored(self.reconnect.period_ms, MIN_RECONNECT_PERIOD)
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: Duration::from_millis(self.connection.connect_timeout_ms),
            invoke_timeout: Duration::from_millis(self.invoke.timeout_ms),
            connections_per_provider: self.connection.connections_per_provider.max(1),
            callbacks: None,
        }
    }
}

fn floored(period_ms: u64, floor: Duration) -> Option<Duration> {
    if period_ms == 0 {
        return None;
    }
    Some(Duration::from_millis(period_ms).max(floor))
}

/// Cluster strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterKind {
    #[serde(alias = "fail_fast")]
    Failfast,
    #[default]
    #[serde(alias = "fail_over")]
    Failover,
    Pinpoint,
    Resettable,
}

/// Load balancer selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerKind {
    #[default]
    Random,
    RoundRobin,
    LeastActive,
}

/// One routing rule.
///
/// A rule applies to calls whose method starts with `method_prefix` and whose
/// attachments contain every `attachments` entry. It keeps only providers whose
/// attribute `key` equals `value`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouterRuleConfig {
    /// Rule identifier for logging.
    pub name: String,

    /// Higher priority rules apply first.
    #[serde(default)]
    pub priority: u32,

    #[serde(default)]
    pub method_prefix: Option<String>,

    #[serde(default)]
    pub attachments: HashMap<String, String>,

    /// Provider attribute to match.
    pub key: String,

    pub value: String,
}

/// Interface-level call configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InvokeConfig {
    pub timeout_ms: u64,

    /// Extra attempts under failover.
    pub retries: u32,

    pub invoke_type: InvokeType,
}

impl Default for InvokeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 3000,
            retries: 0,
            invoke_type: InvokeType::Sync,
        }
    }
}

/// Method-level overrides. Unset fields fall back to [`InvokeConfig`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MethodConfig {
    pub timeout_ms: Option<u64>,
    pub retries: Option<u32>,
    pub invoke_type: Option<InvokeType>,
}

/// Connection establishment and teardown.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub connect_timeout_ms: u64,

    /// Drain budget when releasing a transport.
    pub disconnect_timeout_ms: u64,

    pub connections_per_provider: usize,

    /// Grace delay between the two liveness checks after connect.
    pub double_check_delay_ms: u64,

    /// Upper bound on concurrent connects in a burst.
    pub parallel_connect_cap: usize,

    /// Fixed slack added to the burst timeout.
    pub init_slack_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3000,
            disconnect_timeout_ms: 10_000,
            connections_per_provider: 1,
            double_check_delay_ms: 100,
            parallel_connect_cap: 10,
            init_slack_ms: 500,
        }
    }
}

/// Heartbeat loop configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Period in milliseconds; 0 disables the loop.
    pub period_ms: u64,

    pub timeout_ms: u64,

    /// Consecutive failures that move alive → subHealth.
    pub sub_health_threshold: u32,

    /// Consecutive failures that move subHealth → retry.
    pub retry_threshold: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            period_ms: 30_000,
            timeout_ms: 3000,
            sub_health_threshold: 6,
            retry_threshold: 60,
        }
    }
}

/// Reconnect loop configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Period in milliseconds; 0 disables the loop.
    pub period_ms: u64,

    /// Cap on the backoff coefficient.
    pub max_coefficient: u32,

    /// Coefficient assigned when a connect succeeds but fails the double-check.
    pub soft_failure_coefficient: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            period_ms: 10_000,
            max_coefficient: 32,
            soft_failure_coefficient: 5,
        }
    }
}

/// Listener delivery pool.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CallbackConfig {
    pub pool_size: usize,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self { pool_size: 20 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines.
    pub json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_override_wins() {
        let mut config = ConsumerConfig::new("com.acme.Echo");
        config.invoke.retries = 2;
        config.methods.insert(
            "slow".into(),
            MethodConfig {
                timeout_ms: Some(9000),
                ..Default::default()
            },
        );
        assert_eq!(config.method_timeout("slow"), Duration::from_millis(9000));
        assert_eq!(config.method_timeout("fast"), Duration::from_millis(3000));
        assert_eq!(config.method_retries("slow"), 2);
    }

    #[test]
    fn test_period_floors() {
        let mut config = ConsumerConfig::default();
        config.heartbeat.period_ms = 1000;
        config.reconnect.period_ms = 0;
        assert_eq!(config.effective_heartbeat_period(), Some(MIN_HEARTBEAT_PERIOD));
        assert_eq!(config.effective_reconnect_period(), None);

        config.reconnect.period_ms = 7000;
        assert_eq!(config.effective_reconnect_period(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_defaults() {
        let config = ConsumerConfig::default();
        assert_eq!(config.cluster, ClusterKind::Failover);
        assert_eq!(config.heartbeat.sub_health_threshold, 6);
        assert_eq!(config.heartbeat.retry_threshold, 60);
        assert_eq!(config.connection.parallel_connect_cap, 10);
    }
}
