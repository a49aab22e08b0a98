//! Fail-fast: one attempt, every failure surfaces immediately.

use crate::cluster::ClusterStrategy;
use crate::error::RpcError;

#[derive(Debug, Default, Clone, Copy)]
pub struct FailFast;

impl ClusterStrategy for FailFast {
    fn name(&self) -> &'static str {
        "failfast"
    }

    fn max_attempts(&self, _retries: u32) -> u32 {
        1
    }

    fn is_retryable(&self, _error: &RpcError) -> bool {
        false
    }
}
