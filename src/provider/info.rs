//! Immutable provider identity.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Weight assigned when the URL carries none.
pub const DEFAULT_WEIGHT: i32 = 100;

/// Identity used for equality, hashing and the holder index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderKey {
    pub protocol: String,
    pub address: String,
    pub group: Option<String>,
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.group {
            Some(g) => write!(f, "{}://{}#{}", self.protocol, self.address, g),
            None => write!(f, "{}://{}", self.protocol, self.address),
        }
    }
}

/// A remote service instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    protocol: String,
    host: String,
    port: u16,
    path: String,
    rpc_version: u32,
    serialization: Option<String>,
    group: Option<String>,
    weight: i32,
    attrs: BTreeMap<String, String>,
}

impl ProviderInfo {
    /// Create a provider with default metadata.
    pub fn new(protocol: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol: protocol.into(),
            host: host.into(),
            port,
            path: String::new(),
            rpc_version: 0,
            serialization: None,
            group: None,
            weight: DEFAULT_WEIGHT,
            attrs: BTreeMap::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_rpc_version(mut self, version: u32) -> Self {
        self.rpc_version = version;
        self
    }

    pub fn with_serialization(mut self, serialization: impl Into<String>) -> Self {
        self.serialization = Some(serialization.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn rpc_version(&self) -> u32 {
        self.rpc_version
    }

    pub fn serialization(&self) -> Option<&str> {
        self.serialization.as_deref()
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Raw weight as published; may be negative.
    pub fn weight(&self) -> i32 {
        self.weight
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    pub fn attrs(&self) -> &BTreeMap<String, String> {
        &self.attrs
    }

    pub fn key(&self) -> ProviderKey {
        ProviderKey {
            protocol: self.protocol.clone(),
            address: self.address(),
            group: self.group.clone(),
        }
    }
}

impl PartialEq for ProviderInfo {
    fn eq(&self, other: &Self) -> bool {
        self.protocol == other.protocol
            && self.host == other.host
            && self.port == other.port
            && self.group == other.group
    }
}

impl Eq for ProviderInfo {}

impl Hash for ProviderInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.protocol.hash(state);
        self.host.hash(state);
        self.port.hash(state);
        self.group.hash(state);
    }
}

impl fmt::Display for ProviderInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
