//! Explicit per-call context.
//!
//! Carries caller inputs (target address, attachments) down the invocation
//! chain and the chosen provider, peer addresses and attempt count back up.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::provider::ProviderInfo;

/// Attachment key read by pinpoint routing when no explicit target is set.
pub const TARGET_ADDRESS_KEY: &str = "rpc.target.address";

#[derive(Debug, Clone)]
pub struct CallContext {
    /// Correlates log lines of all attempts of this call.
    pub trace_id: Uuid,
    /// `host:port` (or `proto://host:port`) the call must go to.
    pub target_address: Option<String>,
    /// Caller key/value attributes; routing rules match on them.
    pub attachments: HashMap<String, String>,
    /// Provider of the last attempt.
    pub provider: Option<Arc<ProviderInfo>>,
    pub remote_address: Option<SocketAddr>,
    pub local_address: Option<SocketAddr>,
    pub attempts: u32,
    /// Elapsed time of the last attempt.
    pub elapsed: Option<Duration>,
}

impl CallContext {
    pub fn new() -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            target_address: None,
            attachments: HashMap::new(),
            provider: None,
            remote_address: None,
            local_address: None,
            attempts: 0,
            elapsed: None,
        }
    }

    pub fn with_target(mut self, address: impl Into<String>) -> Self {
        self.target_address = Some(address.into());
        self
    }

    pub fn with_attachment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attachments.insert(key.into(), value.into());
        self
    }

    pub fn attachment(&self, key: &str) -> Option<&str> {
        self.attachments.get(key).map(String::as_str)
    }

    /// Explicit target, falling back to the target attachment.
    pub fn target(&self) -> Option<&str> {
        self.target_address
            .as_deref()
            .or_else(|| self.attachment(TARGET_ADDRESS_KEY))
            .filter(|t| !t.is_empty())
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}
