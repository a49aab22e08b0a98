//! Failover: retry remote and timeout failures on providers not yet tried.

use crate::cluster::ClusterStrategy;
use crate::error::RpcError;

#[derive(Debug, Default, Clone, Copy)]
pub struct Failover;

impl ClusterStrategy for Failover {
    fn name(&self) -> &'static str {
        "failover"
    }

    fn max_attempts(&self, retries: u32) -> u32 {
        retries.saturating_add(1)
    }

    fn is_retryable(&self, error: &RpcError) -> bool {
        error.is_retryable()
    }
}
