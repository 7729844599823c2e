//! Status enums shared across the coordinator.
//!
//! Every enum here is ordered from least to most severe, and derives `Ord`
//! so that `a.max(b)` escalates severity. Aggregation code relies on this:
//! a status variable only ever moves up within one monitoring pass.

use std::fmt;

use tracing::Level;

/// The overall status of a resource, combining master records, node records
/// and synchronization state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceStatus {
    /// No information available.
    Unknown,
    /// The cluster, resource or node is administratively disabled.
    Disabled,
    /// Monitoring is not running.
    Stopped,
    /// Everything checks out.
    Healthy,
    /// Monitoring has started but no pass has completed yet.
    Starting,
    /// Something is off (unexpected TTL, transient lookup failure, stale result).
    Warning,
    /// A lookup failed permanently or work errored out.
    Error,
    /// The DNS view is contradictory; synchronization is not allowed.
    Inconsistent,
}

impl ResourceStatus {
    /// The log level recommended for messages associated with this status.
    pub fn log_level(self) -> Level {
        match self {
            ResourceStatus::Unknown | ResourceStatus::Disabled | ResourceStatus::Stopped => {
                Level::DEBUG
            }
            ResourceStatus::Healthy | ResourceStatus::Starting => Level::INFO,
            ResourceStatus::Warning => Level::WARN,
            ResourceStatus::Error | ResourceStatus::Inconsistent => Level::ERROR,
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceStatus::Unknown => "unknown",
            ResourceStatus::Disabled => "disabled",
            ResourceStatus::Stopped => "stopped",
            ResourceStatus::Healthy => "healthy",
            ResourceStatus::Starting => "starting",
            ResourceStatus::Warning => "warning",
            ResourceStatus::Error => "error",
            ResourceStatus::Inconsistent => "inconsistent",
        };
        f.write_str(name)
    }
}

/// Status of the master records of a resource, as observed across all
/// enabled nameservers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MasterDnsStatus {
    /// No information available.
    Unknown,
    /// Monitoring disabled.
    Disabled,
    /// Monitoring stopped.
    Stopped,
    /// Monitoring started, no pass completed yet.
    Starting,
    /// All master records agree across all nameservers.
    Consistent,
    /// Consistent, but with warnings (e.g. unexpected TTL).
    Warning,
    /// Master records disagree or point outside the cluster.
    Inconsistent,
}

impl MasterDnsStatus {
    /// The resource status this master DNS status will cause.
    pub fn resource_status(self) -> ResourceStatus {
        match self {
            MasterDnsStatus::Unknown => ResourceStatus::Unknown,
            MasterDnsStatus::Disabled => ResourceStatus::Disabled,
            MasterDnsStatus::Stopped => ResourceStatus::Stopped,
            MasterDnsStatus::Starting => ResourceStatus::Starting,
            MasterDnsStatus::Consistent => ResourceStatus::Healthy,
            MasterDnsStatus::Warning => ResourceStatus::Warning,
            MasterDnsStatus::Inconsistent => ResourceStatus::Inconsistent,
        }
    }
}

impl fmt::Display for MasterDnsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MasterDnsStatus::Unknown => "unknown",
            MasterDnsStatus::Disabled => "disabled",
            MasterDnsStatus::Stopped => "stopped",
            MasterDnsStatus::Starting => "starting",
            MasterDnsStatus::Consistent => "consistent",
            MasterDnsStatus::Warning => "warning",
            MasterDnsStatus::Inconsistent => "inconsistent",
        };
        f.write_str(name)
    }
}

/// The role of one node for one resource, as observed via DNS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeDnsStatus {
    /// No information available.
    Unknown,
    /// The node is administratively disabled.
    Disabled,
    /// Monitoring stopped.
    Stopped,
    /// Monitoring started, no pass completed yet.
    Starting,
    /// The node's records resolve but do not match the master records.
    Slave,
    /// The node's records are a subset of the master record addresses.
    Master,
    /// The node's records are contradictory (duplicate or mismatched A records).
    Inconsistent,
}

impl NodeDnsStatus {
    /// The resource status this node DNS status will cause.
    pub fn resource_status(self) -> ResourceStatus {
        match self {
            NodeDnsStatus::Unknown => ResourceStatus::Unknown,
            NodeDnsStatus::Disabled => ResourceStatus::Disabled,
            NodeDnsStatus::Stopped => ResourceStatus::Stopped,
            NodeDnsStatus::Starting => ResourceStatus::Starting,
            NodeDnsStatus::Slave | NodeDnsStatus::Master => ResourceStatus::Healthy,
            NodeDnsStatus::Inconsistent => ResourceStatus::Inconsistent,
        }
    }
}

impl fmt::Display for NodeDnsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeDnsStatus::Unknown => "unknown",
            NodeDnsStatus::Disabled => "disabled",
            NodeDnsStatus::Stopped => "stopped",
            NodeDnsStatus::Starting => "starting",
            NodeDnsStatus::Slave => "slave",
            NodeDnsStatus::Master => "master",
            NodeDnsStatus::Inconsistent => "inconsistent",
        };
        f.write_str(name)
    }
}

/// Outcome classification of a single A-record lookup against one nameserver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DnsLookupStatus {
    /// Records returned, no complaints.
    Successful,
    /// Records returned, with warnings (e.g. unexpected TTL).
    Warning,
    /// Transient failure; retries exhausted.
    TryAgain,
    /// The name does not exist.
    HostNotFound,
    /// The name exists but has no A records.
    TypeNotFound,
    /// Permanent server or network failure.
    Unrecoverable,
    /// Unexpected failure; details in the status messages.
    Error,
}

impl DnsLookupStatus {
    /// The resource status this lookup status will cause.
    pub fn resource_status(self) -> ResourceStatus {
        match self {
            DnsLookupStatus::Successful => ResourceStatus::Healthy,
            DnsLookupStatus::Warning | DnsLookupStatus::TryAgain => ResourceStatus::Warning,
            DnsLookupStatus::HostNotFound
            | DnsLookupStatus::TypeNotFound
            | DnsLookupStatus::Unrecoverable
            | DnsLookupStatus::Error => ResourceStatus::Error,
        }
    }

    /// Whether this lookup produced usable addresses.
    pub fn is_successful(self) -> bool {
        matches!(self, DnsLookupStatus::Successful | DnsLookupStatus::Warning)
    }
}

impl fmt::Display for DnsLookupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DnsLookupStatus::Successful => "successful",
            DnsLookupStatus::Warning => "warning",
            DnsLookupStatus::TryAgain => "try-again",
            DnsLookupStatus::HostNotFound => "host not found",
            DnsLookupStatus::TypeNotFound => "type not found",
            DnsLookupStatus::Unrecoverable => "unrecoverable",
            DnsLookupStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// The state of one synchronizer between the local node and a remote node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SynchronizerState {
    /// The cluster, resource, local node or remote node is disabled.
    Disabled,
    /// Not started.
    Stopped,
    /// Waiting for the next scheduled tick.
    Sleeping,
    /// A test run is in progress.
    Testing,
    /// A synchronization run is in progress.
    Synchronizing,
}

impl SynchronizerState {
    /// The resource status this synchronizer state will cause.
    pub fn resource_status(self) -> ResourceStatus {
        match self {
            SynchronizerState::Disabled => ResourceStatus::Disabled,
            SynchronizerState::Stopped => ResourceStatus::Stopped,
            SynchronizerState::Sleeping
            | SynchronizerState::Testing
            | SynchronizerState::Synchronizing => ResourceStatus::Healthy,
        }
    }
}

impl fmt::Display for SynchronizerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SynchronizerState::Disabled => "disabled",
            SynchronizerState::Stopped => "stopped",
            SynchronizerState::Sleeping => "sleeping",
            SynchronizerState::Testing => "testing",
            SynchronizerState::Synchronizing => "synchronizing",
        };
        f.write_str(name)
    }
}

/// What a synchronizer run is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncMode {
    /// Transfer data so the remote matches the local resource.
    Synchronize,
    /// Verify consistency only; no data is transferred.
    TestOnly,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Synchronize => f.write_str("synchronize"),
            SyncMode::TestOnly => f.write_str("test-only"),
        }
    }
}
