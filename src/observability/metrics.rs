//! Metrics collection.
//!
//! # Metrics
//! - `rpc_client_calls_total` (counter): calls by provider, method, outcome
//! - `rpc_client_call_duration_seconds` (histogram): call latency
//! - `rpc_client_providers` (gauge): providers per partition
//! - `rpc_client_retries_total` (counter): failover retries by service
//! - `rpc_client_availability_changes_total` (counter): availability edges

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

pub mod names {
    pub const CALLS_TOTAL: &str = "rpc_client_calls_total";
    pub const CALL_DURATION: &str = "rpc_client_call_duration_seconds";
    pub const PROVIDERS: &str = "rpc_client_providers";
    pub const RETRIES_TOTAL: &str = "rpc_client_retries_total";
    pub const AVAILABILITY_CHANGES: &str = "rpc_client_availability_changes_total";
}

pub fn record_call(provider: &str, method: &str, success: bool, elapsed: Duration) {
    let outcome = if success { "success" } else { "failure" };
    counter!(
        names::CALLS_TOTAL,
        "provider" => provider.to_string(),
        "method" => method.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(
        names::CALL_DURATION,
        "provider" => provider.to_string(),
        "method" => method.to_string()
    )
    .record(elapsed.as_secs_f64());
}

/// Publish partition sizes after a holder transition.
pub fn record_partitions(service: &str, alive: usize, sub_health: usize, retry: usize) {
    gauge!(names::PROVIDERS, "service" => service.to_string(), "partition" => "alive").set(alive as f64);
    gauge!(names::PROVIDERS, "service" => service.to_string(), "partition" => "sub_health").set(sub_health as f64);
    gauge!(names::PROVIDERS, "service" => service.to_string(), "partition" => "retry").set(retry as f64);
}

pub fn record_retry(service: &str) {
    counter!(names::RETRIES_TOTAL, "service" => service.to_string()).increment(1);
}

pub fn record_availability_change(service: &str, available: bool) {
    let state = if available { "available" } else { "unavailable" };
    counter!(names::AVAILABILITY_CHANGES, "service" => service.to_string(), "state" => state).increment(1);
}

/// Describe all metrics (call after the host installs a recorder).
pub fn describe_metrics() {
    describe_counter!(names::CALLS_TOTAL, "Total client calls by provider, method and outcome");
    describe_histogram!(names::CALL_DURATION, "Client call latency in seconds");
    describe_gauge!(names::PROVIDERS, "Providers per holder partition");
    describe_counter!(names::RETRIES_TOTAL, "Failover retries");
    describe_counter!(names::AVAILABILITY_CHANGES, "Availability transitions of a consumer");
}
