//! Weighted random load balancing strategy.

use rand::Rng;
use std::sync::Arc;

use crate::load_balancer::{get_weight, LoadBalancer};
use crate::provider::ProviderInfo;
use crate::transport::RpcRequest;

/// Picks a candidate with probability proportional to its weight.
///
/// Falls back to a uniform pick when all weights are equal or zero.
#[derive(Debug, Default)]
pub struct WeightedRandom;

impl WeightedRandom {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for WeightedRandom {
    fn name(&self) -> &'static str {
        "random"
    }

    fn do_select(&self, _request: &RpcRequest, candidates: &[Arc<ProviderInfo>]) -> Option<Arc<ProviderInfo>> {
        pick_weighted(candidates)
    }
}

pub(crate) fn pick_weighted(candidates: &[Arc<ProviderInfo>]) -> Option<Arc<ProviderInfo>> {
    if candidates.is_empty() {
        return None;
    }
    let mut rng = rand::thread_rng();

    let first = get_weight(&candidates[0]);
    let total: u64 = candidates.iter().map(|p| u64::from(get_weight(p))).sum();
    let same = candidates.iter().all(|p| get_weight(p) == first);

    if total == 0 || same {
        return candidates.get(rng.gen_range(0..candidates.len())).cloned();
    }

    let mut offset = rng.gen_range(0..total);
    for provider in candidates {
        let weight = u64::from(get_weight(provider));
        if offset < weight {
            return Some(provider.clone());
        }
        offset -= weight;
    }
    candidates.last().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_weight_never_chosen() {
        let lb = WeightedRandom::new();
        let req = RpcRequest::new("svc", "m");
        let heavy = Arc::new(ProviderInfo::new("bolt", "10.0.0.1", 1).with_weight(10));
        let zero = Arc::new(ProviderInfo::new("bolt", "10.0.0.2", 1).with_weight(0));
        let candidates = vec![zero, heavy.clone()];
        for _ in 0..100 {
            assert_eq!(lb.select(&req, &candidates).unwrap(), heavy);
        }
    }

    #[test]
    fn test_all_candidates_reachable() {
        let lb = WeightedRandom::new();
        let req = RpcRequest::new("svc", "m");
        let candidates: Vec<_> = (1..=3)
            .map(|p| Arc::new(ProviderInfo::new("bolt", "10.0.0.1", p)))
            .collect();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..500 {
            seen.insert(lb.select(&req, &candidates).unwrap().port());
        }
        assert_eq!(seen.len(), 3);
    }
}
