//! Client-side runtime of an RPC framework.
//!
//! Keeps connections to a changing set of providers healthy, picks one per
//! call and drives the call through a fault-tolerance strategy.

pub mod client;
pub mod cluster;
pub mod config;
pub mod error;
pub mod holder;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod provider;
pub mod resilience;
pub mod routing;
pub mod transport;

pub use client::{ClientBuilder, ConsumerClient};
pub use cluster::{CallContext, InvokeResult};
pub use config::ConsumerConfig;
pub use error::{ErrorKind, Result, RpcError};
pub use holder::{AvailabilityListener, ConnectionHolder, Partition};
pub use provider::ProviderInfo;
pub use transport::{ResponseFuture, RpcRequest, RpcResponse, Transport, TransportFactory};
