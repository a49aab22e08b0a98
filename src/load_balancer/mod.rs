//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Cluster has routed, non-excluded alive candidates
//!     → LoadBalancer::select
//!         - 0 candidates: None (the cluster raises no-alive first)
//!         - 1 candidate: returned as is, the policy is not consulted
//!         - otherwise: policy picks one
//!             - random.rs (weighted random)
//!             - round_robin.rs (rotate through candidates)
//!             - least_active.rs (fewest in-flight calls)
//! ```
//!
//! # Design Decisions
//! - Balancers are shared by concurrent callers and hold no per-call state
//! - Weights come from the provider; negative weights count as 0

pub mod least_active;
pub mod random;
pub mod round_robin;

use std::fmt::Debug;
use std::sync::Arc;

use crate::cluster::stats::CallStats;
use crate::config::LoadBalancerKind;
use crate::provider::ProviderInfo;
use crate::transport::RpcRequest;

pub use least_active::LeastActive;
pub use random::WeightedRandom;
pub use round_robin::RoundRobin;

/// Selection policy over a candidate list.
pub trait LoadBalancer: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Pick among at least two candidates.
    fn do_select(&self, request: &RpcRequest, candidates: &[Arc<ProviderInfo>]) -> Option<Arc<ProviderInfo>>;

    /// Pick one candidate.
    fn select(&self, request: &RpcRequest, candidates: &[Arc<ProviderInfo>]) -> Option<Arc<ProviderInfo>> {
        match candidates {
            [] => None,
            [only] => Some(only.clone()),
            _ => self.do_select(request, candidates),
        }
    }
}

/// Provider weight, clamped at 0.
pub fn get_weight(provider: &ProviderInfo) -> u32 {
    provider.weight().max(0) as u32
}

pub fn build_load_balancer(kind: LoadBalancerKind, stats: Arc<CallStats>) -> Arc<dyn LoadBalancer> {
    match kind {
        LoadBalancerKind::Random => Arc::new(WeightedRandom::new()),
        LoadBalancerKind::RoundRobin => Arc::new(RoundRobin::new()),
        LoadBalancerKind::LeastActive => Arc::new(LeastActive::new(stats)),
    }
}
