//! Metrics instrumentation for shepherd-dns.
//!
//! All metrics are prefixed with `shepherd_dns.`

use std::time::Instant;

use metrics::{counter, gauge, histogram};

use crate::status::{DnsLookupStatus, ResourceStatus, SyncMode};

/// Record one completed DNS monitoring pass.
pub fn record_dns_pass(resource: &str, status: ResourceStatus, duration: std::time::Duration) {
    counter!("shepherd_dns.dns.pass.count", "resource" => resource.to_string())
        .increment(1);
    histogram!("shepherd_dns.dns.pass.duration.seconds", "resource" => resource.to_string())
        .record(duration.as_secs_f64());
    gauge!("shepherd_dns.resource.status", "resource" => resource.to_string())
        .set(status as u8 as f64);
}

/// Record the outcome of one lookup.
pub fn record_lookup(status: DnsLookupStatus) {
    let status_str = match status {
        DnsLookupStatus::Successful => "successful",
        DnsLookupStatus::Warning => "warning",
        DnsLookupStatus::TryAgain => "try_again",
        DnsLookupStatus::HostNotFound => "host_not_found",
        DnsLookupStatus::TypeNotFound => "type_not_found",
        DnsLookupStatus::Unrecoverable => "unrecoverable",
        DnsLookupStatus::Error => "error",
    };
    counter!("shepherd_dns.dns.lookup.count", "status" => status_str).increment(1);
}

/// Record one completed synchronization or test run.
pub fn record_sync_run(
    resource: &str,
    mode: SyncMode,
    status: ResourceStatus,
    duration: std::time::Duration,
) {
    let mode_str = match mode {
        SyncMode::Synchronize => "synchronize",
        SyncMode::TestOnly => "test_only",
    };
    let status_str = match status {
        ResourceStatus::Error | ResourceStatus::Inconsistent => "error",
        ResourceStatus::Warning => "warning",
        _ => "ok",
    };
    counter!(
        "shepherd_dns.sync.run.count",
        "resource" => resource.to_string(),
        "mode" => mode_str,
        "result" => status_str
    )
    .increment(1);
    histogram!(
        "shepherd_dns.sync.run.duration.seconds",
        "resource" => resource.to_string(),
        "mode" => mode_str
    )
    .record(duration.as_secs_f64());
}

/// Record cluster topology counts (on start and reload).
pub fn record_topology(nodes: usize, resources: usize, synchronizers: usize) {
    gauge!("shepherd_dns.cluster.nodes.count").set(nodes as f64);
    gauge!("shepherd_dns.cluster.resources.count").set(resources as f64);
    gauge!("shepherd_dns.cluster.synchronizers.count").set(synchronizers as f64);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
