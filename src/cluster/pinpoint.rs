//! Pinpoint: route to the caller's explicit target, failover otherwise.

use std::sync::Arc;

use crate::cluster::context::CallContext;
use crate::cluster::{Cluster, ClusterStrategy};
use crate::error::{Result, RpcError};
use crate::holder::Connection;
use crate::provider::ProviderInfo;
use crate::transport::RpcRequest;

#[derive(Debug, Default, Clone, Copy)]
pub struct Pinpoint;

impl ClusterStrategy for Pinpoint {
    fn name(&self) -> &'static str {
        "pinpoint"
    }

    fn max_attempts(&self, retries: u32) -> u32 {
        retries.saturating_add(1)
    }

    fn is_retryable(&self, error: &RpcError) -> bool {
        error.is_retryable()
    }

    fn select(
        &self,
        cluster: &Cluster,
        request: &RpcRequest,
        ctx: &CallContext,
        tried: &[Arc<ProviderInfo>],
    ) -> Result<Connection> {
        let Some(target) = ctx.target() else {
            return cluster.select_connection(request, ctx, tried);
        };

        let no_route = |detail: &str| RpcError::NoAliveProvider {
            service: cluster.service().to_string(),
            detail: format!("target {} {}", target, detail),
        };

        let provider = cluster
            .holder()
            .find_alive(target)
            .ok_or_else(|| no_route("is not alive"))?;
        if tried.contains(&provider) {
            return Err(no_route("was already tried"));
        }
        let conn = cluster
            .holder()
            .connection(&provider)
            .ok_or_else(|| no_route("left the alive set"))?;
        if !conn.transport.is_available() {
            cluster
                .holder()
                .demote_to_retry(&provider, "transport unavailable at selection");
            return Err(no_route("has no available transport"));
        }
        Ok(conn)
    }
}
