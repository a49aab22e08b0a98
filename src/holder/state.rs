//! Per-provider records addressed by a stable id.
//!
//! Each provider lives in exactly one slot and its `partition` field is the
//! single source of truth for its health class, so a provider can never be
//! observed in two partitions. Removed slots are recycled with a bumped
//! generation; a stale [`ProviderId`] never resolves to a newer provider.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::provider::{ProviderInfo, ProviderKey};
use crate::resilience::backoff::INITIAL_COEFFICIENT;
use crate::transport::Transport;

/// Health class of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    /// Serving business calls.
    Alive,
    /// Heartbeats only, no business calls.
    SubHealth,
    /// Waiting for the reconnect loop.
    Retry,
}

impl Partition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Alive => "alive",
            Partition::SubHealth => "sub_health",
            Partition::Retry => "retry",
        }
    }

    /// True for partitions that count towards availability.
    pub fn is_connected(&self) -> bool {
        matches!(self, Partition::Alive | Partition::SubHealth)
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProviderId {
    index: u32,
    generation: u32,
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Mutable state of one provider.
#[derive(Debug)]
pub struct ProviderEntry {
    pub provider: Arc<ProviderInfo>,
    pub transport: Arc<dyn Transport>,
    pub partition: Partition,
    pub heartbeat_failures: u32,
    pub reconnect_failures: u32,
    /// Reconnect attempts happen on ticks divisible by this.
    pub coefficient: u32,
    /// A connect burst owns this provider; the reconnect loop skips it.
    pub connecting: bool,
    pub negotiated_version: Option<u32>,
    /// Bumped whenever the connection is torn down or re-established.
    pub epoch: u64,
}

impl ProviderEntry {
    pub fn new(provider: Arc<ProviderInfo>, transport: Arc<dyn Transport>) -> Self {
        Self {
            provider,
            transport,
            partition: Partition::Retry,
            heartbeat_failures: 0,
            reconnect_failures: 0,
            coefficient: INITIAL_COEFFICIENT,
            connecting: false,
            negotiated_version: None,
            epoch: 0,
        }
    }

    /// Version used for negotiation hints.
    pub fn rpc_version(&self) -> u32 {
        self.negotiated_version.unwrap_or_else(|| self.provider.rpc_version())
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    entry: Option<ProviderEntry>,
}

#[derive(Debug, Default)]
pub struct ProviderArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    index: HashMap<ProviderKey, ProviderId>,
}

impl ProviderArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a provider. Returns `None` if one with the same key is present.
    pub fn insert(&mut self, entry: ProviderEntry) -> Option<ProviderId> {
        let key = entry.provider.key();
        if self.index.contains_key(&key) {
            return None;
        }

        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                ProviderId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                ProviderId { index, generation: 0 }
            }
        };
        self.index.insert(key, id);
        Some(id)
    }

    pub fn remove(&mut self, id: ProviderId) -> Option<ProviderEntry> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.index.remove(&entry.provider.key());
        Some(entry)
    }

    pub fn lookup(&self, key: &ProviderKey) -> Option<ProviderId> {
        self.index.get(key).copied()
    }

    pub fn get(&self, id: ProviderId) -> Option<&ProviderEntry> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.entry.as_ref())
    }

    pub fn get_mut(&mut self, id: ProviderId) -> Option<&mut ProviderEntry> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.entry.as_mut())
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProviderId, &ProviderEntry)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.entry.as_ref().map(|e| {
                (
                    ProviderId {
                        index: i as u32,
                        generation: s.generation,
                    },
                    e,
                )
            })
        })
    }

    pub fn ids_in(&self, partition: Partition) -> Vec<ProviderId> {
        self.iter()
            .filter(|(_, e)| e.partition == partition)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn count(&self, partition: Partition) -> usize {
        self.iter().filter(|(_, e)| e.partition == partition).count()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Remove every provider.
    pub fn drain(&mut self) -> Vec<ProviderEntry> {
        let ids: Vec<ProviderId> = self.iter().map(|(id, _)| id).collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::transport::{ResponseFuture, RpcRequest, RpcResponse};
    use async_trait::async_trait;
    use std::net::SocketAddr;
    use std::time::Duration;

    #[derive(Debug)]
    struct Inert;

    #[async_trait]
    impl Transport for Inert {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }
        async fn disconnect(&self) {}
        fn is_open(&self) -> bool {
            false
        }
        fn is_available(&self) -> bool {
            false
        }
        async fn send(&self, _: &RpcRequest, _: Duration) -> Result<Option<RpcResponse>> {
            Ok(None)
        }
        async fn async_send(&self, _: &RpcRequest, t: Duration) -> Result<Arc<ResponseFuture>> {
            Ok(Arc::new(ResponseFuture::new(0, t)))
        }
        async fn one_way_send(&self, _: &RpcRequest, _: Duration) -> Result<()> {
            Ok(())
        }
        fn remote_address(&self) -> Option<SocketAddr> {
            None
        }
        fn local_address(&self) -> Option<SocketAddr> {
            None
        }
    }

    fn entry(port: u16) -> ProviderEntry {
        ProviderEntry::new(Arc::new(ProviderInfo::new("bolt", "10.0.0.1", port)), Arc::new(Inert))
    }

    #[test]
    fn test_insert_rejects_duplicate_key() {
        let mut arena = ProviderArena::new();
        assert!(arena.insert(entry(1)).is_some());
        assert!(arena.insert(entry(1)).is_none());
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_stale_id_after_reuse() {
        let mut arena = ProviderArena::new();
        let first = arena.insert(entry(1)).unwrap();
        assert!(arena.remove(first).is_some());
        assert!(arena.remove(first).is_none());

        let second = arena.insert(entry(2)).unwrap();
        assert_ne!(first, second);
        assert!(arena.get(first).is_none());
        assert_eq!(arena.get(second).unwrap().provider.port(), 2);
        assert_eq!(arena.lookup(&ProviderInfo::new("bolt", "10.0.0.1", 2).key()), Some(second));
        assert!(arena.lookup(&ProviderInfo::new("bolt", "10.0.0.1", 1).key()).is_none());
    }

    #[test]
    fn test_partition_counts() {
        let mut arena = ProviderArena::new();
        let a = arena.insert(entry(1)).unwrap();
        arena.insert(entry(2)).unwrap();
        arena.get_mut(a).unwrap().partition = Partition::Alive;

        assert_eq!(arena.count(Partition::Alive), 1);
        assert_eq!(arena.count(Partition::Retry), 1);
        assert_eq!(arena.ids_in(Partition::Alive), vec![a]);

        assert_eq!(arena.drain().len(), 2);
        assert!(arena.is_empty());
    }
}
