//! Least-active load balancing strategy.

use std::sync::Arc;

use crate::cluster::stats::CallStats;
use crate::load_balancer::random::pick_weighted;
use crate::load_balancer::LoadBalancer;
use crate::provider::ProviderInfo;
use crate::transport::RpcRequest;

/// Selects the candidate with the fewest in-flight calls.
/// Ties are broken by weighted random.
#[derive(Debug)]
pub struct LeastActive {
    stats: Arc<CallStats>,
}

impl LeastActive {
    pub fn new(stats: Arc<CallStats>) -> Self {
        Self { stats }
    }
}

impl LoadBalancer for LeastActive {
    fn name(&self) -> &'static str {
        "least_active"
    }

    fn do_select(&self, _request: &RpcRequest, candidates: &[Arc<ProviderInfo>]) -> Option<Arc<ProviderInfo>> {
        let least = candidates
            .iter()
            .map(|p| self.stats.in_flight(&p.key()))
            .min()?;
        let tied: Vec<_> = candidates
            .iter()
            .filter(|p| self.stats.in_flight(&p.key()) == least)
            .cloned()
            .collect();
        pick_weighted(&tied)
    }
}
