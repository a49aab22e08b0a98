//! Resettable: failover semantics plus a gate that holds calls off while
//! every transport is swapped for a new provider list.
//!
//! Calls take the gate shared without waiting; a reset takes it exclusively
//! and waits for calls in flight. A call arriving during a reset fails with
//! [`RpcError::Resetting`] instead of reaching a half torn-down pool.

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::cluster::ClusterStrategy;
use crate::error::RpcError;

#[derive(Debug, Default)]
pub struct Resettable {
    gate: Arc<RwLock<()>>,
}

impl Resettable {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClusterStrategy for Resettable {
    fn name(&self) -> &'static str {
        "resettable"
    }

    fn max_attempts(&self, retries: u32) -> u32 {
        retries.saturating_add(1)
    }

    fn is_retryable(&self, error: &RpcError) -> bool {
        error.is_retryable()
    }

    fn reset_gate(&self) -> Option<&Arc<RwLock<()>>> {
        Some(&self.gate)
    }
}
