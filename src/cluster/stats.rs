//! Per-(provider, method) call statistics and in-flight tracking.
//!
//! # Responsibilities
//! - Count calls and failures, accumulate elapsed time
//! - Track in-flight calls per provider (least-active balancing, draining)
//! - Wait for a provider to go idle before its transport is released

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::provider::ProviderKey;

const DRAIN_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct MethodCounters {
    total: AtomicU64,
    failures: AtomicU64,
    elapsed_ms: AtomicU64,
}

/// Point-in-time view of one (provider, method) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallStatsEntry {
    pub provider: String,
    pub method: String,
    pub total: u64,
    pub failures: u64,
    pub elapsed_ms: u64,
}

/// Call statistics shared by the cluster, the balancer and the holder.
#[derive(Debug, Default)]
pub struct CallStats {
    calls: DashMap<(ProviderKey, String), MethodCounters>,
    in_flight: DashMap<ProviderKey, Arc<AtomicUsize>>,
}

impl CallStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call start. The guard decrements on drop.
    pub fn begin(&self, provider: &ProviderKey) -> InFlightGuard {
        let counter = self
            .in_flight
            .entry(provider.clone())
            .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
            .clone();
        counter.fetch_add(1, Ordering::SeqCst);
        InFlightGuard { counter }
    }

    pub fn record(&self, provider: &ProviderKey, method: &str, success: bool, elapsed: Duration) {
        let entry = self
            .calls
            .entry((provider.clone(), method.to_string()))
            .or_default();
        entry.total.fetch_add(1, Ordering::Relaxed);
        if !success {
            entry.failures.fetch_add(1, Ordering::Relaxed);
        }
        entry
            .elapsed_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn in_flight(&self, provider: &ProviderKey) -> usize {
        self.in_flight
            .get(provider)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn total_in_flight(&self) -> usize {
        self.in_flight.iter().map(|e| e.value().load(Ordering::SeqCst)).sum()
    }

    /// Wait until `provider` has no call in flight. Returns false on timeout.
    pub async fn wait_idle(&self, provider: &ProviderKey, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.in_flight(provider) > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }
        true
    }

    /// Wait until nothing is in flight. Returns false on timeout.
    pub async fn wait_all_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.total_in_flight() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }
        true
    }

    /// Drop everything tracked for a removed provider.
    pub fn forget(&self, provider: &ProviderKey) {
        self.in_flight.remove_if(provider, |_, c| c.load(Ordering::SeqCst) == 0);
        self.calls.retain(|(key, _), _| key != provider);
    }

    pub fn get(&self, provider: &ProviderKey, method: &str) -> Option<CallStatsEntry> {
        self.calls
            .get(&(provider.clone(), method.to_string()))
            .map(|c| Self::entry(provider, method, c.value()))
    }

    pub fn snapshot(&self) -> Vec<CallStatsEntry> {
        let mut out: Vec<_> = self
            .calls
            .iter()
            .map(|e| Self::entry(&e.key().0, &e.key().1, e.value()))
            .collect();
        out.sort_by(|a, b| (&a.provider, &a.method).cmp(&(&b.provider, &b.method)));
        out
    }

    fn entry(provider: &ProviderKey, method: &str, c: &MethodCounters) -> CallStatsEntry {
        CallStatsEntry {
            provider: provider.to_string(),
            method: method.to_string(),
            total: c.total.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            elapsed_ms: c.elapsed_ms.load(Ordering::Relaxed),
        }
    }
}

/// Guard that tracks one in-flight call.
#[derive(Debug)]
pub struct InFlightGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderInfo;

    fn key(port: u16) -> ProviderKey {
        ProviderInfo::new("bolt", "127.0.0.1", port).key()
    }

    #[test]
    fn test_in_flight_counts() {
        let stats = CallStats::new();
        let a = key(1);
        assert_eq!(stats.in_flight(&a), 0);

        let g1 = stats.begin(&a);
        let g2 = stats.begin(&a);
        assert_eq!(stats.in_flight(&a), 2);
        assert_eq!(stats.total_in_flight(), 2);

        drop(g1);
        assert_eq!(stats.in_flight(&a), 1);
        drop(g2);
        assert_eq!(stats.in_flight(&a), 0);
    }

    #[test]
    fn test_record_by_provider_and_method() {
        let stats = CallStats::new();
        let a = key(1);
        stats.record(&a, "echo", true, Duration::from_millis(5));
        stats.record(&a, "echo", false, Duration::from_millis(7));
        stats.record(&a, "ping", true, Duration::from_millis(1));

        let echo = stats.get(&a, "echo").unwrap();
        assert_eq!(echo.total, 2);
        assert_eq!(echo.failures, 1);
        assert_eq!(echo.elapsed_ms, 12);
        assert_eq!(stats.snapshot().len(), 2);
    }

    #[test]
    fn test_forget_drops_provider_rows() {
        let stats = CallStats::new();
        let (a, b) = (key(1), key(2));
        stats.record(&a, "echo", true, Duration::from_millis(1));
        stats.record(&a, "ping", true, Duration::from_millis(1));
        stats.record(&b, "echo", true, Duration::from_millis(1));
        drop(stats.begin(&a));

        stats.forget(&a);
        assert!(stats.get(&a, "echo").is_none());
        assert!(stats.get(&a, "ping").is_none());
        assert_eq!(stats.snapshot().len(), 1);
        assert!(!stats.in_flight.contains_key(&a));
    }

    #[tokio::test]
    async fn test_wait_idle() {
        let stats = Arc::new(CallStats::new());
        let a = key(1);
        let guard = stats.begin(&a);
        assert!(!stats.wait_idle(&a, Duration::from_millis(30)).await);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(guard);
        });
        assert!(stats.wait_idle(&a, Duration::from_secs(2)).await);
    }
}
