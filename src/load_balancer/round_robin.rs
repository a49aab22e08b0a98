//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::LoadBalancer;
use crate::provider::ProviderInfo;
use crate::transport::RpcRequest;

/// Round-robin selector.
/// Stores an internal counter to rotate through candidates.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn do_select(&self, _request: &RpcRequest, candidates: &[Arc<ProviderInfo>]) -> Option<Arc<ProviderInfo>> {
        if candidates.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
        candidates.get(index).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new();
        let req = RpcRequest::new("svc", "m");
        let p1 = Arc::new(ProviderInfo::new("bolt", "127.0.0.1", 8080));
        let p2 = Arc::new(ProviderInfo::new("bolt", "127.0.0.1", 8081));
        let candidates = vec![p1.clone(), p2.clone()];

        assert_eq!(lb.select(&req, &candidates).unwrap(), p1);
        assert_eq!(lb.select(&req, &candidates).unwrap(), p2);
        assert_eq!(lb.select(&req, &candidates).unwrap(), p1);
    }
}
