//! Provider readiness probe.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::error::Result;
use crate::provider::ProviderInfo;
use crate::transport::Transport;

/// What a probe learned about a freshly connected provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    /// The provider has finished exporting the service.
    pub exported_fully: bool,
    /// Protocol version agreed with the provider, if any.
    pub negotiated_version: Option<u32>,
}

impl ProbeResult {
    pub fn ready() -> Self {
        Self {
            exported_fully: true,
            negotiated_version: None,
        }
    }
}

/// Checks that a connected provider can take calls before it is promoted.
///
/// A probe error is logged and the provider is promoted anyway.
#[async_trait]
pub trait ProviderProbe: Send + Sync + Debug {
    async fn probe(&self, provider: &ProviderInfo, transport: &dyn Transport) -> Result<ProbeResult>;
}

/// Accepts every provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProbe;

#[async_trait]
impl ProviderProbe for NoopProbe {
    async fn probe(&self, _provider: &ProviderInfo, _transport: &dyn Transport) -> Result<ProbeResult> {
        Ok(ProbeResult::ready())
    }
}
