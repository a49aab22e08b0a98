//! Per-attempt invocation envelope.
//!
//! Adds negotiation properties, times the call, dispatches by invoke type,
//! records statistics and feeds the outcome back into the holder.

use std::time::{Duration, Instant};

use crate::cluster::context::CallContext;
use crate::cluster::{Cluster, InvokeResult};
use crate::error::{Result, RpcError};
use crate::holder::Connection;
use crate::observability::metrics;
use crate::transport::{InvokeType, RpcRequest};

/// Request property carrying the negotiated protocol version.
pub const PROP_RPC_VERSION: &str = "rpc.version";
/// Request property carrying the serialization the consumer expects back.
pub const PROP_SERIALIZATION: &str = "rpc.serialization";
/// Request property carrying the call's trace id.
pub const PROP_TRACE_ID: &str = "rpc.trace_id";

pub(crate) async fn invoke_once(
    cluster: &Cluster,
    conn: &Connection,
    request: &RpcRequest,
    ctx: &mut CallContext,
    invoke_type: InvokeType,
    timeout: Duration,
) -> Result<InvokeResult> {
    let request = prepare(cluster, conn, request, ctx);
    let provider = &conn.provider;
    let key = provider.key();

    ctx.provider = Some(provider.clone());
    ctx.remote_address = conn.transport.remote_address();
    ctx.local_address = conn.transport.local_address();

    let started = Instant::now();
    let result = {
        let _in_flight = cluster.stats().begin(&key);
        match invoke_type {
            InvokeType::Sync => match conn.transport.send(&request, timeout).await {
                Ok(Some(resp)) if resp.is_error() => Err(RpcError::Server {
                    provider: provider.address(),
                    message: resp.error.unwrap_or_default(),
                }),
                Ok(Some(resp)) => Ok(InvokeResult::Response(resp)),
                Ok(None) => Err(RpcError::EmptyResponse {
                    provider: provider.address(),
                    method: request.method.clone(),
                }),
                Err(e) => Err(e),
            },
            InvokeType::Future => conn
                .transport
                .async_send(&request, timeout)
                .await
                .map(InvokeResult::Future),
            InvokeType::Oneway => conn
                .transport
                .one_way_send(&request, timeout)
                .await
                .map(|_| InvokeResult::Sent),
        }
    };
    let elapsed = started.elapsed();
    ctx.elapsed = Some(elapsed);

    cluster.stats().record(&key, &request.method, result.is_ok(), elapsed);
    metrics::record_call(&provider.address(), &request.method, result.is_ok(), elapsed);

    match &result {
        Ok(_) => cluster.holder().record_success(provider),
        Err(e) => {
            tracing::debug!(
                service = %cluster.service(),
                method = %request.method,
                trace_id = %ctx.trace_id,
                provider = %provider,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %e,
                "Attempt failed"
            );
            if e.is_connection_closed() {
                cluster
                    .holder()
                    .demote_to_retry(provider, "connection closed during call");
            }
        }
    }
    result
}

/// Per-attempt copy of the request with context and negotiation properties.
fn prepare(cluster: &Cluster, conn: &Connection, request: &RpcRequest, ctx: &CallContext) -> RpcRequest {
    let mut request = request.clone();
    for (k, v) in &ctx.attachments {
        request.props.entry(k.clone()).or_insert_with(|| v.clone());
    }
    request
        .props
        .insert(PROP_TRACE_ID.to_string(), ctx.trace_id.to_string());

    let config = cluster.config();
    let min_version = config.negotiation_min_version;
    if min_version > 0 && conn.rpc_version >= min_version {
        request
            .props
            .insert(PROP_RPC_VERSION.to_string(), conn.rpc_version.to_string());
        let serialization = conn
            .provider
            .serialization()
            .or(config.serialization.as_deref());
        if let Some(serialization) = serialization {
            request
                .props
                .insert(PROP_SERIALIZATION.to_string(), serialization.to_string());
        }
    }
    request
}
