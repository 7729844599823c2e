//! Immutable result types published by monitors and synchronizers.
//!
//! Results are constructed once per pass and shared behind `Arc`; nothing
//! mutates them after publication. Severity aggregation always uses
//! `max`, so a status can only escalate while a result is being assembled.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hickory_resolver::Name;

use crate::monitor::{DNS_ATTEMPTS, DNS_CHECK_INTERVAL, DNS_CHECK_TIMEOUT};
use crate::status::{
    DnsLookupStatus, MasterDnsStatus, NodeDnsStatus, ResourceStatus, SyncMode,
};
use crate::topology::{Nameserver, Node, Resource, ResourceNode};

/// A result is considered stale (warning) this many seconds after its pass
/// started: ten seconds past the longest possible check time including
/// retries and timeouts.
pub const WARNING_SECONDS: i64 =
    10 + (DNS_CHECK_INTERVAL.as_secs() + DNS_ATTEMPTS as u64 * DNS_CHECK_TIMEOUT.as_secs()) as i64;

/// A result this old counts as an error: one more check interval past the
/// warning threshold.
pub const ERROR_SECONDS: i64 = WARNING_SECONDS + DNS_CHECK_INTERVAL.as_secs() as i64;

/// Lookup results per nameserver, in enabled-nameserver order.
pub type NameserverLookups = Vec<(Nameserver, DnsLookupResult)>;

/// Lookup results per record, in declared record order.
pub type RecordLookups = Vec<(Name, NameserverLookups)>;

/// Finds the lookups for one record.
pub fn lookups_for<'a>(lookups: &'a RecordLookups, record: &Name) -> Option<&'a NameserverLookups> {
    lookups.iter().find(|(name, _)| name == record).map(|(_, l)| l)
}

/// Finds the result for one nameserver within a record's lookups.
pub fn lookup_for<'a>(
    lookups: &'a NameserverLookups,
    nameserver: &Nameserver,
) -> Option<&'a DnsLookupResult> {
    lookups
        .iter()
        .find(|(ns, _)| ns == nameserver)
        .map(|(_, result)| result)
}

/// The outcome of one A-record lookup against one nameserver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsLookupResult {
    name: Name,
    status: DnsLookupStatus,
    status_messages: BTreeSet<String>,
    addresses: BTreeSet<String>,
}

impl DnsLookupResult {
    /// Creates a lookup result. Addresses must be non-empty exactly when the
    /// status is successful or warning.
    pub fn new(
        name: Name,
        status: DnsLookupStatus,
        status_messages: impl IntoIterator<Item = String>,
        addresses: impl IntoIterator<Item = String>,
    ) -> Self {
        let result = Self {
            name,
            status,
            status_messages: status_messages.into_iter().collect(),
            addresses: addresses.into_iter().collect(),
        };
        debug_assert_eq!(
            result.status.is_successful(),
            !result.addresses.is_empty(),
            "addresses must be non-empty iff the lookup succeeded"
        );
        result
    }

    /// The record name that was looked up.
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Classification of the lookup outcome.
    pub fn status(&self) -> DnsLookupStatus {
        self.status
    }

    /// Diagnostic messages (TTL complaints, error details), sorted.
    pub fn status_messages(&self) -> &BTreeSet<String> {
        &self.status_messages
    }

    /// The addresses returned, sorted. Empty unless the lookup succeeded.
    pub fn addresses(&self) -> &BTreeSet<String> {
        &self.addresses
    }
}

/// The DNS view of one node for one resource, from one monitoring pass.
#[derive(Debug, Clone)]
pub struct ResourceNodeDnsResult {
    resource_node: Arc<ResourceNode>,
    node_record_lookups: Option<RecordLookups>,
    node_status: NodeDnsStatus,
    node_status_messages: BTreeSet<String>,
}

impl ResourceNodeDnsResult {
    /// Creates a node result. When lookups are present they must contain
    /// exactly one entry per declared node record, each with one entry per
    /// enabled nameserver; callers assemble them in that shape.
    pub(crate) fn new(
        resource_node: Arc<ResourceNode>,
        node_record_lookups: Option<RecordLookups>,
        node_status: NodeDnsStatus,
        node_status_messages: impl IntoIterator<Item = String>,
    ) -> Self {
        if let Some(lookups) = &node_record_lookups {
            assert_eq!(
                lookups.len(),
                resource_node.node_records().len(),
                "node record lookups must cover every declared record"
            );
        }
        Self {
            resource_node,
            node_record_lookups,
            node_status,
            node_status_messages: node_status_messages.into_iter().collect(),
        }
    }

    /// The resource-node this result describes.
    pub fn resource_node(&self) -> &Arc<ResourceNode> {
        &self.resource_node
    }

    /// Lookup results per node record, or `None` when no lookups were
    /// performed (stopped, disabled, starting).
    pub fn node_record_lookups(&self) -> Option<&RecordLookups> {
        self.node_record_lookups.as_ref()
    }

    /// The role this node holds according to the pass.
    pub fn node_status(&self) -> NodeDnsStatus {
        self.node_status
    }

    /// Status messages for this node, sorted.
    pub fn node_status_messages(&self) -> &BTreeSet<String> {
        &self.node_status_messages
    }
}

/// The results of one full DNS monitoring pass for a resource.
#[derive(Debug)]
pub struct ResourceDnsResult {
    resource: Arc<Resource>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    master_record_lookups: Option<RecordLookups>,
    master_status: MasterDnsStatus,
    master_status_messages: BTreeSet<String>,
    node_results: Vec<ResourceNodeDnsResult>,
}

impl ResourceDnsResult {
    /// Creates a pass result. When master lookups are present they must
    /// contain exactly one entry per master record, each with one entry per
    /// enabled nameserver; node results must cover every resource node.
    pub(crate) fn new(
        resource: Arc<Resource>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        master_record_lookups: Option<RecordLookups>,
        master_status: MasterDnsStatus,
        master_status_messages: impl IntoIterator<Item = String>,
        node_results: Vec<ResourceNodeDnsResult>,
    ) -> Self {
        if let Some(lookups) = &master_record_lookups {
            assert_eq!(
                lookups.len(),
                resource.master_records().len(),
                "master record lookups must cover every master record"
            );
            for (record, per_nameserver) in lookups {
                assert_eq!(
                    per_nameserver.len(),
                    resource.enabled_nameservers().len(),
                    "master record {record} must have a lookup per enabled nameserver"
                );
            }
        }
        assert_eq!(
            node_results.len(),
            resource.resource_nodes().len(),
            "node results must cover every resource node"
        );
        Self {
            resource,
            start_time,
            end_time,
            master_record_lookups,
            master_status,
            master_status_messages: master_status_messages.into_iter().collect(),
            node_results,
        }
    }

    /// The resource this result describes.
    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }

    /// When the pass started.
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// When the pass finished.
    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    /// Lookup results per master record, or `None` when no lookups were
    /// performed (stopped, disabled, starting).
    pub fn master_record_lookups(&self) -> Option<&RecordLookups> {
        self.master_record_lookups.as_ref()
    }

    /// Status of the master records.
    pub fn master_status(&self) -> MasterDnsStatus {
        self.master_status
    }

    /// Master status messages, sorted.
    pub fn master_status_messages(&self) -> &BTreeSet<String> {
        &self.master_status_messages
    }

    /// Per-node results, in resource-node order.
    pub fn node_results(&self) -> &[ResourceNodeDnsResult] {
        &self.node_results
    }

    /// The result for one node.
    pub fn node_result(&self, node: &Node) -> Option<&ResourceNodeDnsResult> {
        self.node_results
            .iter()
            .find(|r| r.resource_node().node().as_ref() == node)
    }

    /// Freshness of this result at `now`: `None` when no lookups were
    /// performed (a stopped or disabled result does not go stale), otherwise
    /// healthy/warning/error by age.
    pub fn freshness_status(&self, now: DateTime<Utc>) -> Option<ResourceStatus> {
        self.master_record_lookups.as_ref()?;
        let age = (now - self.start_time).num_seconds().abs();
        Some(if age > ERROR_SECONDS {
            ResourceStatus::Error
        } else if age > WARNING_SECONDS {
            ResourceStatus::Warning
        } else {
            ResourceStatus::Healthy
        })
    }

    /// The resource status this result causes at `now`, combining freshness,
    /// master status, node statuses and every individual lookup status.
    pub fn resource_status(&self, now: DateTime<Utc>) -> ResourceStatus {
        let mut status = ResourceStatus::Unknown;

        if let Some(freshness) = self.freshness_status(now) {
            if freshness != ResourceStatus::Healthy {
                status = status.max(freshness);
            }
        }

        status = status.max(self.master_status.resource_status());
        if let Some(lookups) = &self.master_record_lookups {
            for (_, per_nameserver) in lookups {
                for (_, lookup) in per_nameserver {
                    status = status.max(lookup.status().resource_status());
                }
            }
        }

        for node_result in &self.node_results {
            status = status.max(node_result.node_status().resource_status());
            if let Some(lookups) = node_result.node_record_lookups() {
                for (_, per_nameserver) in lookups {
                    for (_, lookup) in per_nameserver {
                        status = status.max(lookup.status().resource_status());
                    }
                }
            }
        }

        status
    }
}

/// One step of a synchronization or test run.
#[derive(Debug, Clone)]
pub struct SyncStep {
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    status: ResourceStatus,
    description: String,
    outputs: Vec<String>,
    warnings: Vec<String>,
    errors: Vec<String>,
}

impl SyncStep {
    /// Creates a step.
    pub fn new(
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        status: ResourceStatus,
        description: impl Into<String>,
        outputs: Vec<String>,
        warnings: Vec<String>,
        errors: Vec<String>,
    ) -> Self {
        Self {
            start_time,
            end_time,
            status,
            description: description.into(),
            outputs,
            warnings,
            errors,
        }
    }

    /// When this step started.
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// When this step finished.
    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    /// The status this step causes.
    pub fn status(&self) -> ResourceStatus {
        self.status
    }

    /// Human-readable description of the step.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Captured outputs, or empty.
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    /// Captured warnings, or empty.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Captured errors, or empty.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}

/// The result of one synchronization or test run between two nodes.
#[derive(Debug, Clone)]
pub struct SyncResult {
    local_resource_node: Arc<ResourceNode>,
    remote_resource_node: Arc<ResourceNode>,
    mode: SyncMode,
    steps: Vec<SyncStep>,
}

impl SyncResult {
    /// Creates a run result. At least one step is required.
    pub fn new(
        local_resource_node: Arc<ResourceNode>,
        remote_resource_node: Arc<ResourceNode>,
        mode: SyncMode,
        steps: Vec<SyncStep>,
    ) -> Self {
        assert!(!steps.is_empty(), "a synchronization result needs at least one step");
        Self {
            local_resource_node,
            remote_resource_node,
            mode,
            steps,
        }
    }

    /// The local side of the run.
    pub fn local_resource_node(&self) -> &Arc<ResourceNode> {
        &self.local_resource_node
    }

    /// The remote side of the run.
    pub fn remote_resource_node(&self) -> &Arc<ResourceNode> {
        &self.remote_resource_node
    }

    /// Whether this was a synchronization or a test.
    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// The steps of the run, in execution order.
    pub fn steps(&self) -> &[SyncStep] {
        &self.steps
    }

    /// Earliest step start.
    pub fn start_time(&self) -> DateTime<Utc> {
        self.steps
            .iter()
            .map(SyncStep::start_time)
            .min()
            .expect("steps are non-empty")
    }

    /// Latest step end.
    pub fn end_time(&self) -> DateTime<Utc> {
        self.steps
            .iter()
            .map(SyncStep::end_time)
            .max()
            .expect("steps are non-empty")
    }

    /// The highest status of any step.
    pub fn resource_status(&self) -> ResourceStatus {
        self.steps
            .iter()
            .map(SyncStep::status)
            .fold(ResourceStatus::Unknown, ResourceStatus::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    use crate::config::{NameserverConfig, NodeConfig};
    use crate::topology::parse_name;

    fn make_node(id: &str) -> Arc<Node> {
        Arc::new(
            Node::from_config(
                true,
                &NodeConfig {
                    id: id.to_string(),
                    enabled: true,
                    display: format!("Node {id}"),
                    hostname: format!("{id}.example.com"),
                    username: "appsync".to_string(),
                    nameservers: vec![NameserverConfig {
                        hostname: "ns1.example.com".to_string(),
                        strict_ttl: false,
                    }],
                },
            )
            .unwrap(),
        )
    }

    fn make_resource_node(id: &str, record: &str) -> Arc<ResourceNode> {
        Arc::new(ResourceNode::new(
            make_node(id),
            vec![parse_name(record).unwrap()],
        ))
    }

    fn make_step(offset_secs: i64, duration_secs: i64, status: ResourceStatus) -> SyncStep {
        let start = Utc::now() + TimeDelta::seconds(offset_secs);
        SyncStep::new(
            start,
            start + TimeDelta::seconds(duration_secs),
            status,
            "step",
            vec![],
            vec![],
            vec![],
        )
    }

    #[test]
    fn test_freshness_thresholds() {
        assert_eq!(WARNING_SECONDS, 100);
        assert_eq!(ERROR_SECONDS, 130);
    }

    #[test]
    fn test_sync_result_aggregates_over_steps() {
        let local = make_resource_node("alpha", "www-alpha.example.com");
        let remote = make_resource_node("beta", "www-beta.example.com");
        let steps = vec![
            make_step(0, 5, ResourceStatus::Healthy),
            make_step(-10, 2, ResourceStatus::Warning),
            make_step(3, 60, ResourceStatus::Healthy),
        ];
        let result = SyncResult::new(local, remote, SyncMode::Synchronize, steps.clone());

        assert_eq!(result.start_time(), steps[1].start_time());
        assert_eq!(result.end_time(), steps[2].end_time());
        assert_eq!(result.resource_status(), ResourceStatus::Warning);
    }

    #[test]
    #[should_panic(expected = "at least one step")]
    fn test_sync_result_rejects_empty_steps() {
        let local = make_resource_node("alpha", "www-alpha.example.com");
        let remote = make_resource_node("beta", "www-beta.example.com");
        SyncResult::new(local, remote, SyncMode::TestOnly, vec![]);
    }

    #[test]
    fn test_lookup_result_sorts_addresses_and_messages() {
        let result = DnsLookupResult::new(
            parse_name("www.example.com").unwrap(),
            DnsLookupStatus::Successful,
            vec![],
            vec!["10.0.0.2".to_string(), "10.0.0.1".to_string()],
        );
        let addresses: Vec<&String> = result.addresses().iter().collect();
        assert_eq!(addresses, ["10.0.0.1", "10.0.0.2"]);
    }
}
